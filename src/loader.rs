//! Request-driven background decoder.
//! Receives paths, decodes off-thread and returns RGBA8 images without
//! blocking the tick loop.
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::error::CarveError;

/// Message sent to the background loader thread.
pub enum LoaderMsg {
    /// Decode this path.
    Decode(PathBuf),
    /// Stop the loader.
    Quit,
}

/// A decoded image ready for upload.
pub struct DecodedImage {
    /// File name (for logging/title).
    pub name: String,
    pub image: RgbaImage,
}

pub type DecodeResult = Result<DecodedImage, CarveError>;

/// Decode `path` to RGBA8 on the calling thread.
pub fn decode(path: &Path) -> DecodeResult {
    let image = image::open(path).map_err(|source| CarveError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(DecodedImage {
        name: path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into(),
        image: image.to_rgba8(),
    })
}

/// Spawn the request-driven loader.
pub fn spawn_loader(rx: Receiver<LoaderMsg>, tx: Sender<DecodeResult>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            match msg {
                LoaderMsg::Quit => break,
                LoaderMsg::Decode(path) => {
                    let result = decode(&path);
                    match &result {
                        Ok(decoded) => debug!(
                            name = %decoded.name,
                            width = decoded.image.width(),
                            height = decoded.image.height(),
                            "decoded"
                        ),
                        Err(err) => warn!(error = %err, "decode failed"),
                    }
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn decodes_in_background_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("tiny.png");
        RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]))
            .save(&good)
            .unwrap();
        let bad = dir.path().join("broken.png");
        std::fs::write(&bad, b"not a png").unwrap();

        let (req_tx, req_rx) = unbounded();
        let (res_tx, res_rx) = unbounded();
        let handle = spawn_loader(req_rx, res_tx);
        req_tx.send(LoaderMsg::Decode(good)).unwrap();
        req_tx.send(LoaderMsg::Decode(bad)).unwrap();
        req_tx.send(LoaderMsg::Quit).unwrap();

        let first = res_rx.recv().unwrap().unwrap();
        assert_eq!(first.name, "tiny.png");
        assert_eq!(first.image.dimensions(), (3, 2));
        assert!(matches!(
            res_rx.recv().unwrap(),
            Err(CarveError::Decode { .. })
        ));
        handle.join().unwrap();
    }
}
