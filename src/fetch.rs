use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use reqwest::{blocking::Client, StatusCode};

use crate::error::{FetchError, FilesystemError};

/// Blocking HTTP client used for all downloads.  No timeout if `timeout` is
/// `None`.
pub fn client(timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

/// Download `url` into `destination` with a single GET request.
///
/// The body is streamed to a `.part` file next to `destination` and renamed
/// once complete, so `destination` only appears if the server answered 200
/// and the whole body was written.  The parent directory is created if
/// needed.
pub fn fetch(client: &Client, url: &str, destination: &Path) -> Result<PathBuf, FetchError> {
    let mut response = client.get(url).send().map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
    })?;
    if response.status() != StatusCode::OK {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    if let Some(dir) = destination.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| FilesystemError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let part = part_path(destination);
    let mut out = File::create(&part).map_err(|source| FilesystemError::Write {
        path: part.clone(),
        source,
    })?;
    let bytes = match response.copy_to(&mut out) {
        Ok(n) => n,
        Err(source) => {
            drop(out);
            let _ = fs::remove_file(&part);
            return Err(FetchError::Request {
                url: url.to_string(),
                source,
            });
        }
    };
    drop(out);
    fs::rename(&part, destination).map_err(|source| {
        let _ = fs::remove_file(&part);
        FilesystemError::Rename {
            from: part.clone(),
            to: destination.to_path_buf(),
            source,
        }
    })?;
    info!("downloaded {} bytes from {} to {}", bytes, url, destination.display());
    Ok(destination.to_path_buf())
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::error::Error;
    use std::thread;

    use tiny_http::{Response, Server};

    use super::*;

    /// Serve `routes` (path -> status, body) on a random local port and
    /// return the base url.  Unknown paths get a 404.
    pub(crate) fn serve(routes: HashMap<String, (u16, Vec<u8>)>) -> String {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let (status, body) = routes
                    .get(request.url())
                    .cloned()
                    .unwrap_or((404, b"not found".to_vec()));
                let _ = request.respond(Response::from_data(body).with_status_code(status));
            }
        });
        format!("http://127.0.0.1:{}", port)
    }

    #[test]
    fn fetch_ok_writes_exact_bytes() -> Result<(), Box<dyn Error>> {
        let body = "Empresa,Voo\nAZU,4001\nGLO,1234\n".as_bytes().to_vec();
        let base = serve(HashMap::from([(
            "/VRA_2024_01.csv".to_string(),
            (200, body.clone()),
        )]));
        let dir = tempfile::tempdir()?;
        let destination = dir.path().join("scratch").join("vra_2024_01.csv");

        let path = fetch(&client(None)?, &format!("{}/VRA_2024_01.csv", base), &destination)?;
        assert_eq!(path, destination);
        assert_eq!(fs::read(&destination)?, body);
        let files: Vec<_> = fs::read_dir(dir.path().join("scratch"))?.collect();
        assert_eq!(files.len(), 1);
        Ok(())
    }

    #[test]
    fn fetch_not_found_writes_nothing() -> Result<(), Box<dyn Error>> {
        let base = serve(HashMap::new());
        let dir = tempfile::tempdir()?;
        let destination = dir.path().join("vra_2024_13.csv");

        let err = fetch(&client(None)?, &format!("{}/VRA_2024_13.csv", base), &destination)
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(!destination.exists());
        assert!(!part_path(&destination).exists());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn fetch_server_error() -> Result<(), Box<dyn Error>> {
        let base = serve(HashMap::from([(
            "/VRA_2024_02.csv".to_string(),
            (500, b"oops".to_vec()),
        )]));
        let dir = tempfile::tempdir()?;
        let destination = dir.path().join("vra_2024_02.csv");
        let err = fetch(&client(None)?, &format!("{}/VRA_2024_02.csv", base), &destination)
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { .. }));
        assert_eq!(err.status_code(), Some(500));
        assert!(!destination.exists());
        Ok(())
    }

    #[test]
    fn fetch_unreachable() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let destination = dir.path().join("vra.csv");
        // port 9 (discard) is not listening on localhost
        let err = fetch(&client(None)?, "http://127.0.0.1:9/vra.csv", &destination).unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
        assert_eq!(err.status_code(), None);
        assert!(!destination.exists());
        Ok(())
    }

    #[test]
    fn part_file_name() {
        assert_eq!(
            part_path(Path::new("tmp/vra_2024_01.csv")),
            PathBuf::from("tmp/vra_2024_01.csv.part")
        );
    }
}
