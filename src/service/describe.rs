use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use futures::FutureExt;
use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, ImageReader};
use log::debug;
use serde::{Deserialize, Serialize};

use super::Describer;
use crate::error::{CatalogError, Result};

pub const DEFAULT_PROMPT: &str = "Describe in detail everything you see in this image: the \
location, objects, characters and what they are doing, the format, the theme and the colors. \
Include everything that could help find this image later by its description. Do not ask \
follow-up questions, only describe the image.";

/// 通过 Ollama `/api/generate` 接口调用视觉模型生成描述
pub struct OllamaDescriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: [String; 1],
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaDescriber {
    pub fn new(
        base_url: &str,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("imcatalog/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::DescriptorUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_owned(),
            prompt: prompt.to_owned(),
        })
    }

    async fn request(&self, image: &[u8]) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: [BASE64_STANDARD.encode(image)],
            stream: false,
        };

        let unavailable = |e: reqwest::Error| CatalogError::DescriptorUnavailable(e.to_string());
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        let response: GenerateResponse = response.json().await.map_err(|e| {
            CatalogError::DescriptorUnavailable(format!("响应格式错误: {e}"))
        })?;

        Ok(response.response.trim().to_owned())
    }
}

impl Describer for OllamaDescriber {
    fn describe<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<String>> {
        self.request(image).boxed()
    }
}

/// 如果图片最长边超过 `max_size`，则等比缩小并重新编码为 JPEG，不需要缩放时返回 `None`
pub fn shrink_image(data: &[u8], max_size: u32) -> Result<Option<Vec<u8>>> {
    if max_size == 0 {
        return Ok(None);
    }

    let unreadable = |e: image::ImageError| CatalogError::UnreadableImage(e.to_string());
    let (width, height) = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(unreadable)?;
    if width.max(height) <= max_size {
        return Ok(None);
    }

    debug!("缩放图片: {}x{} => {}", width, height, max_size);
    let image = image::load_from_memory(data).map_err(unreadable)?;
    let image = DynamicImage::ImageRgb8(image.thumbnail(max_size, max_size).to_rgb8());
    let mut output = Cursor::new(Vec::new());
    image.write_to(&mut output, ImageFormat::Jpeg).map_err(unreadable)?;
    Ok(Some(output.into_inner()))
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, RgbImage};

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut output = Cursor::new(Vec::new());
        image.write_to(&mut output, ImageFormat::Png).unwrap();
        output.into_inner()
    }

    #[test]
    fn test_shrink_large_image() {
        let data = shrink_image(&png(400, 200), 100).unwrap().unwrap();
        let image = image::load_from_memory(&data).unwrap();
        assert_eq!(image.dimensions(), (100, 50));
    }

    #[test]
    fn test_keep_small_image() {
        let original = png(40, 20);
        assert_eq!(shrink_image(&original, 100).unwrap(), None);
        assert_eq!(shrink_image(&png(400, 200), 0).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let describer = OllamaDescriber::new(
            "http://127.0.0.1:9",
            "gemma3",
            DEFAULT_PROMPT,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = describer.describe(&png(4, 4)).await.unwrap_err();
        assert!(matches!(err, CatalogError::DescriptorUnavailable(_)));
    }

    #[test]
    fn test_shrink_unreadable() {
        let err = shrink_image(b"definitely not an image", 100).unwrap_err();
        assert!(matches!(err, CatalogError::UnreadableImage(_)));
    }
}
