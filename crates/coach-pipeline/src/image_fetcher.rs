//! Image transport is explicitly out of scope (§1: "image fetching
//! transport" is an external collaborator). `ReqwestImageFetcher` is the
//! lightweight default: fetch bytes over HTTP, sniff dimensions, and hand
//! validated bytes to the Analyzer — it does not attempt resizing, format
//! conversion, or provider-specific upload encoding the way a production
//! image pipeline (e.g. the `sven-image` crate's resize/base64 pipeline)
//! would.

use coach_core::{CoachError, FetchedImage, ImageFetcher};

pub struct ReqwestImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl ReqwestImageFetcher {
    pub fn new(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

impl Default for ReqwestImageFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), 20 * 1024 * 1024)
    }
}

#[async_trait::async_trait]
impl ImageFetcher for ReqwestImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, CoachError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| CoachError::ImageFetch(format!("request to {url} failed: {error}")))?;

        if !response.status().is_success() {
            return Err(CoachError::ImageFetch(format!(
                "{url} returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| CoachError::ImageFetch(format!("failed to read body of {url}: {error}")))?;

        if bytes.len() > self.max_bytes {
            return Err(CoachError::ImageFetch(format!(
                "{url} exceeds the {}-byte size limit",
                self.max_bytes
            )));
        }

        let (width, height) = image::ImageReader::new(std::io::Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|error| CoachError::ImageFetch(format!("unrecognized image format for {url}: {error}")))?
            .into_dimensions()
            .map_err(|error| CoachError::ImageFetch(format!("could not read dimensions of {url}: {error}")))?;

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_rejects_a_non_success_status() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = ReqwestImageFetcher::default();
        let error = fetcher.fetch(&format!("{}/missing.png", server.uri())).await.unwrap_err();
        assert!(matches!(error, CoachError::ImageFetch(_)));
    }

    #[tokio::test]
    async fn fetch_extracts_dimensions_from_a_real_png() {
        let png_1x1 = [
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
            0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
            0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78,
            0x9C, 0x62, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
            0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
        ];

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(png_1x1.to_vec()))
            .mount(&server)
            .await;

        let fetcher = ReqwestImageFetcher::default();
        let fetched = fetcher.fetch(&format!("{}/a.png", server.uri())).await.unwrap();
        assert_eq!((fetched.width, fetched.height), (1, 1));
    }

    #[tokio::test]
    async fn fetch_rejects_bodies_over_the_size_limit() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(vec![0u8; 128]))
            .mount(&server)
            .await;

        let fetcher = ReqwestImageFetcher::new(reqwest::Client::new(), 16);
        let error = fetcher.fetch(&format!("{}/big.png", server.uri())).await.unwrap_err();
        assert!(matches!(error, CoachError::ImageFetch(_)));
    }
}
