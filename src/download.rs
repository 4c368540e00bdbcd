use crate::config::Settings;
use crate::error::{FetchError, FetchResult};
use crate::mangadex::{build_http_client, CoverReference};
use crate::throttle::{RateLimiter, RetryPolicy};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug)]
pub enum DownloadStatus {
    Downloaded,
    Skipped,
    Failed(FetchError),
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub cover: CoverReference,
    pub status: DownloadStatus,
    pub path: PathBuf,
    pub attempts: u32,
}

fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_EXTENSION.into())
}

fn sanitize(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// `<root>/<folder>/<folder> - Volume <v>.<ext>`, or `- Cover <index>` when
/// the cover has no volume label.
pub fn cover_path(root: &Path, folder_name: &str, cover: &CoverReference, index: usize) -> PathBuf {
    let ext = extension(&cover.file_name);
    let file_name = match &cover.volume {
        Some(volume) => format!("{} - Volume {}.{}", folder_name, sanitize(volume), ext),
        None => format!("{} - Cover {}.{}", folder_name, index, ext),
    };
    root.join(folder_name).join(file_name)
}

/// Pairs each cover with its destination; volume-less covers are numbered
/// from 1 in listing order.
pub fn plan(
    root: &Path,
    folder_name: &str,
    covers: Vec<CoverReference>,
) -> Vec<(CoverReference, PathBuf)> {
    let mut unlabeled = 0;
    covers
        .into_iter()
        .map(|cover| {
            if cover.volume.is_none() {
                unlabeled += 1;
            }
            let path = cover_path(root, folder_name, &cover, unlabeled);
            (cover, path)
        })
        .collect()
}

pub struct Downloader {
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(settings: &Settings) -> FetchResult<Self> {
        Ok(Self {
            client: build_http_client(&settings.user_agent, settings.timeout)?,
            limiter: RateLimiter::new(settings.delay),
            retry: settings.retry,
        })
    }

    /// Downloads `cover` to `dest` unless a file is already there.
    pub fn fetch(&mut self, cover: CoverReference, dest: PathBuf) -> DownloadOutcome {
        let file_label = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if dest.exists() {
            info!("Cover already exists: {}", file_label);
            return DownloadOutcome {
                cover,
                status: DownloadStatus::Skipped,
                path: dest,
                attempts: 0,
            };
        }

        info!("Downloading cover: {}", file_label);
        debug!("cover {} locale={:?}", cover.id, cover.locale);
        let retry = self.retry;
        let (result, attempts) = retry.run(&file_label, || self.download_once(&cover, &dest));
        let status = match result {
            Ok(bytes) => {
                info!("Successfully downloaded: {} ({} bytes)", file_label, bytes);
                DownloadStatus::Downloaded
            }
            Err(e) => {
                warn!("Failed to download {}: {}", file_label, e);
                DownloadStatus::Failed(e)
            }
        };

        DownloadOutcome {
            cover,
            status,
            path: dest,
            attempts,
        }
    }

    fn download_once(&mut self, cover: &CoverReference, dest: &Path) -> FetchResult<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        self.limiter.wait();
        debug!("GET {}", cover.remote_url);
        let mut resp = self.client.get(&cover.remote_url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &cover.remote_url));
        }

        let part = part_path(dest);
        let written = match write_body(&mut resp, &part) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };
        fs::rename(&part, dest).map_err(|e| FetchError::io(dest, e))?;
        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn write_body(resp: &mut reqwest::blocking::Response, part: &Path) -> FetchResult<u64> {
    let mut file = File::create(part).map_err(|e| FetchError::io(part, e))?;
    copy_body(resp, &mut file, part)
}

/// Read failures come from the network and are transient; write failures
/// are local and reported against `part`.
fn copy_body<R: Read, W: Write>(reader: &mut R, writer: &mut W, part: &Path) -> FetchResult<u64> {
    let mut buf = [0u8; 8192];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FetchError::Transient(format!("reading body: {}", e))),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| FetchError::io(part, e))?;
        written += n as u64;
    }
    writer.flush().map_err(|e| FetchError::io(part, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubResponse, StubServer};
    use std::time::Duration;
    use tempfile::tempdir;

    fn cover(url: &str, file_name: &str, volume: Option<&str>) -> CoverReference {
        CoverReference {
            id: file_name.into(),
            file_name: file_name.into(),
            remote_url: url.into(),
            volume: volume.map(Into::into),
            locale: None,
        }
    }

    fn downloader(max_attempts: u32) -> Downloader {
        Downloader {
            client: build_http_client("test", Duration::from_secs(5)).unwrap(),
            limiter: RateLimiter::new(Duration::ZERO),
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(1),
            },
        }
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct DroppedConnection;

    impl Read for DroppedConnection {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn local_write_failure_is_an_io_error() {
        let part = Path::new("out/M - Volume 1.jpg.part");
        let err = copy_body(&mut &b"image"[..], &mut FullDisk, part).unwrap_err();
        assert!(matches!(err, FetchError::Io { ref path, .. } if path == part));
        assert!(!err.is_transient());
    }

    #[test]
    fn body_read_failure_is_transient() {
        let mut sink = Vec::new();
        let err = copy_body(&mut DroppedConnection, &mut sink, Path::new("x.part")).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn copy_body_counts_bytes() {
        let mut sink = Vec::new();
        let n = copy_body(&mut &b"jpegbytes"[..], &mut sink, Path::new("x.part")).unwrap();
        assert_eq!(n, 9);
        assert_eq!(sink, b"jpegbytes");
    }

    #[test]
    fn paths_are_deterministic() {
        let root = Path::new("/covers");
        let c = cover("u", "abc.PNG", Some("3"));
        assert_eq!(
            cover_path(root, "Berserk", &c, 0),
            Path::new("/covers/Berserk/Berserk - Volume 3.png")
        );
        let c = cover("u", "noext", None);
        assert_eq!(
            cover_path(root, "Berserk", &c, 2),
            Path::new("/covers/Berserk/Berserk - Cover 2.jpg")
        );
        let c = cover("u", "a.jpg", Some("1/2"));
        assert_eq!(
            cover_path(root, "Berserk", &c, 0),
            Path::new("/covers/Berserk/Berserk - Volume 1_2.jpg")
        );
    }

    #[test]
    fn plan_numbers_unlabeled_covers() {
        let covers = vec![
            cover("u", "a.jpg", None),
            cover("u", "b.jpg", Some("1")),
            cover("u", "c.jpg", None),
        ];
        let names: Vec<_> = plan(Path::new("out"), "M", covers)
            .into_iter()
            .map(|(_, p)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["M - Cover 1.jpg", "M - Volume 1.jpg", "M - Cover 2.jpg"]);
    }

    #[test]
    fn downloads_into_new_folder() {
        let server = StubServer::start(|_, _| StubResponse::image(b"jpegbytes"));
        let dir = tempdir().unwrap();
        let c = cover(&format!("{}/covers/m/a.jpg", server.base()), "a.jpg", Some("1"));
        let dest = cover_path(dir.path(), "Vagabond", &c, 0);

        let outcome = downloader(3).fetch(c, dest.clone());
        assert!(matches!(outcome.status, DownloadStatus::Downloaded));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(fs::read(&dest).unwrap(), b"jpegbytes");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn existing_file_is_skipped_without_request() {
        let server = StubServer::start(|_, _| StubResponse::image(b"new"));
        let dir = tempdir().unwrap();
        let c = cover(&format!("{}/covers/m/a.jpg", server.base()), "a.jpg", Some("1"));
        let dest = cover_path(dir.path(), "Vagabond", &c, 0);
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"old").unwrap();

        let outcome = downloader(3).fetch(c, dest.clone());
        assert!(matches!(outcome.status, DownloadStatus::Skipped));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(server.hits().len(), 0);
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }

    #[test]
    fn transient_failure_then_success() {
        let server = StubServer::start(|_, seen| {
            if seen == 0 {
                StubResponse::status(503)
            } else {
                StubResponse::image(b"ok")
            }
        });
        let dir = tempdir().unwrap();
        let c = cover(&format!("{}/covers/m/a.jpg", server.base()), "a.jpg", Some("1"));
        let dest = cover_path(dir.path(), "M", &c, 0);

        let outcome = downloader(3).fetch(c, dest.clone());
        assert!(matches!(outcome.status, DownloadStatus::Downloaded));
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.attempts <= 3);
        assert_eq!(fs::read(&dest).unwrap(), b"ok");
    }

    #[test]
    fn not_found_is_not_retried() {
        let server = StubServer::start(|_, _| StubResponse::status(404));
        let dir = tempdir().unwrap();
        let c = cover(&format!("{}/covers/m/a.jpg", server.base()), "a.jpg", None);
        let dest = cover_path(dir.path(), "M", &c, 1);

        let outcome = downloader(3).fetch(c, dest.clone());
        assert!(matches!(
            outcome.status,
            DownloadStatus::Failed(FetchError::Permanent(_))
        ));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(server.hits().len(), 1);
        assert!(!dest.exists());
    }

    #[test]
    fn exhausted_retries_fail() {
        let server = StubServer::start(|_, _| StubResponse::status(500));
        let dir = tempdir().unwrap();
        let c = cover(&format!("{}/covers/m/a.jpg", server.base()), "a.jpg", None);
        let dest = cover_path(dir.path(), "M", &c, 1);

        let outcome = downloader(2).fetch(c, dest);
        assert!(matches!(
            outcome.status,
            DownloadStatus::Failed(FetchError::Transient(_))
        ));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(server.hits().len(), 2);
    }
}
