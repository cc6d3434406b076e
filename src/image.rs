use crate::buffer::Selection;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const IMGUR_ENDPOINT: &str = "https://api.imgur.com/3/image";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Please select an image file")]
    NotAnImage,
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Image MIME type from the file extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(mime)
}

pub fn data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

pub fn is_url(text: &str) -> bool {
    let text = text.trim();
    text.starts_with("http://") || text.starts_with("https://") || text.starts_with("data:image/")
}

pub trait ImageHost: Send {
    /// Returns the public URL of the uploaded image.
    fn upload(&self, bytes: &[u8], mime: &str) -> Result<String, ImageError>;
}

pub struct ImgurHost {
    agent: ureq::Agent,
    client_id: String,
    endpoint: String,
}

impl ImgurHost {
    pub fn new(client_id: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            client_id: client_id.into(),
            endpoint: IMGUR_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImgurResponse {
    #[serde(default)]
    success: bool,
    data: Option<ImgurData>,
}

#[derive(Debug, Deserialize)]
struct ImgurData {
    link: Option<String>,
}

impl ImageHost for ImgurHost {
    fn upload(&self, bytes: &[u8], _mime: &str) -> Result<String, ImageError> {
        let encoded = STANDARD.encode(bytes);
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Client-ID {}", self.client_id))
            .send_form(&[("image", encoded.as_str()), ("type", "base64")])
            .map_err(|err| ImageError::Upload(err.to_string()))?;
        let body: ImgurResponse = response
            .into_json()
            .map_err(|err| ImageError::Upload(err.to_string()))?;
        match (body.success, body.data.and_then(|d| d.link)) {
            (true, Some(link)) => Ok(link),
            _ => Err(ImageError::Upload("host rejected the image".to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// Reads an image file. Anything without an image extension is refused
/// before the file is opened.
pub fn load_image(path: &Path) -> Result<LoadedImage, ImageError> {
    let mime = mime_for_path(path).ok_or(ImageError::NotAnImage)?;
    let bytes = fs::read(path).map_err(|source| ImageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LoadedImage { bytes, mime })
}

/// Uploads when a host is configured, otherwise or on any failure embeds
/// the image as a data URL. The flag tells whether the upload succeeded.
pub fn resolve_image_url(host: Option<&dyn ImageHost>, image: &LoadedImage) -> (String, bool) {
    if let Some(host) = host {
        match host.upload(&image.bytes, image.mime) {
            Ok(url) => {
                info!(target: "image", %url, "uploaded");
                return (url, true);
            }
            Err(err) => warn!(target: "image", %err, "upload_failed_using_data_url"),
        }
    }
    (data_url(&image.bytes, image.mime), false)
}

#[derive(Debug)]
pub struct ImageJob {
    pub target: Selection,
    pub url: String,
    pub uploaded: bool,
}

pub fn spawn_upload<T>(
    host: Option<Box<dyn ImageHost>>,
    image: LoadedImage,
    target: Selection,
    tx: Sender<T>,
) -> JoinHandle<()>
where
    T: From<ImageJob> + Send + 'static,
{
    thread::spawn(move || {
        let (url, uploaded) = resolve_image_url(host.as_deref(), &image);
        let _ = tx.send(T::from(ImageJob {
            target,
            url,
            uploaded,
        }));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct FailingHost;

    impl ImageHost for FailingHost {
        fn upload(&self, _bytes: &[u8], _mime: &str) -> Result<String, ImageError> {
            Err(ImageError::Upload("offline".to_string()))
        }
    }

    struct FixedHost(&'static str);

    impl ImageHost for FixedHost {
        fn upload(&self, _bytes: &[u8], _mime: &str) -> Result<String, ImageError> {
            Ok(self.0.to_string())
        }
    }

    fn png() -> LoadedImage {
        LoadedImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            mime: "image/png",
        }
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for_path(Path::new("a/logo.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("shot.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("icon.svg")), Some("image/svg+xml"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn non_images_are_refused_before_reading() {
        let err = load_image(Path::new("/definitely/missing/notes.txt")).unwrap_err();
        assert!(matches!(err, ImageError::NotAnImage));

        let err = load_image(Path::new("/definitely/missing/logo.png")).unwrap_err();
        assert!(matches!(err, ImageError::Read { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.gif");
        fs::write(&path, b"GIF89a").unwrap();
        let image = load_image(&path).unwrap();
        assert_eq!(image.mime, "image/gif");
        assert_eq!(image.bytes, b"GIF89a");
    }

    #[test]
    fn failed_upload_falls_back_to_data_url() {
        let (url, uploaded) = resolve_image_url(Some(&FailingHost as &dyn ImageHost), &png());
        assert!(!uploaded);
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn no_host_embeds_directly() {
        let (url, uploaded) = resolve_image_url(None, &png());
        assert!(!uploaded);
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn upload_job_reports_link() {
        let (tx, rx) = mpsc::channel::<ImageJob>();
        let host: Box<dyn ImageHost> = Box::new(FixedHost("https://i.imgur.com/x.png"));
        spawn_upload(Some(host), png(), Selection::caret(3), tx)
            .join()
            .unwrap();
        let job = rx.recv().unwrap();
        assert!(job.uploaded);
        assert_eq!(job.url, "https://i.imgur.com/x.png");
        assert_eq!(job.target, Selection::caret(3));
    }

    #[test]
    fn url_detection() {
        assert!(is_url(" https://example.com/a.png "));
        assert!(is_url("data:image/png;base64,AAAA"));
        assert!(!is_url("./logo.png"));
    }
}
