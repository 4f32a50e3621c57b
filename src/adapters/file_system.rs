use std::path::{Component, Path, PathBuf};

use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Request, Response, Uri, header};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::ports::file_system::{FileSystem, FileSystemError, FileSystemResult};

/// File system adapter using tower-http ServeDir for static file serving.
///
/// The percent-decoded request path is resolved against the root. Directory requests
/// are answered with the first configured index file that exists; there is no
/// directory listing, no precompressed variant lookup and no byte ranges.
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Request path as a relative path with only normal components, or `None`
    /// when it tries to leave the root.
    fn relative_path(path: &str) -> Option<PathBuf> {
        let mut relative = PathBuf::new();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(relative)
    }

    /// Path of the first index file present in the directory named by `path`.
    async fn index_target(root: &Path, path: &str, index_names: &[String]) -> Option<String> {
        if index_names.is_empty() {
            return None;
        }
        // the rewritten URI keeps the encoded form, ServeDir decodes it again
        let decoded = urlencoding::decode(path).ok()?;
        let relative = Self::relative_path(&decoded)?;
        let dir = root.join(&relative);
        if !tokio::fs::metadata(&dir).await.ok()?.is_dir() {
            return None;
        }

        for name in index_names {
            let candidate = dir.join(name);
            if let Ok(meta) = tokio::fs::metadata(&candidate).await {
                if meta.is_file() {
                    let base = path.trim_end_matches('/');
                    return Some(format!("{base}/{name}"));
                }
            }
        }
        None
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(
        &self,
        root: &Path,
        index_names: &[String],
        req: Request<AxumBody>,
    ) -> FileSystemResult<Response<AxumBody>> {
        let (mut parts, body) = req.into_parts();

        if let Some(target) = Self::index_target(root, parts.uri.path(), index_names).await {
            let rewritten = match parts.uri.query() {
                Some(query) => format!("{target}?{query}"),
                None => target,
            };
            parts.uri = rewritten
                .parse::<Uri>()
                .map_err(|e| FileSystemError::InvalidPath(e.to_string()))?;
        }

        // whole-file responses only
        parts.headers.remove(header::RANGE);
        parts.headers.remove(header::IF_RANGE);

        let serve_dir = ServeDir::new(root).append_index_html_on_directories(false);
        let response = serve_dir
            .oneshot(Request::from_parts(parts, body))
            .await
            .map_err(|e| FileSystemError::IoError(std::io::Error::other(e)))?;

        let (parts, tower_body) = response.into_parts();
        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!(error = %e, "error reading static file body");
            axum::Error::new(e)
        }));

        Ok(Response::from_parts(parts, axum_body))
    }
}
