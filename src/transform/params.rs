use crate::config::DEFAULT_QUALITY;
use crate::ProxyError;
use serde::Deserialize;
use std::str::FromStr;

/// Query parameters as they arrive, before validation.
#[derive(Debug, Default, Deserialize)]
struct RawParams {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    w: Option<String>,
    #[serde(default)]
    h: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

/// Validated transformation request.
///
/// `width`/`height` of 0 preserve that dimension (the transcoder scales it
/// to keep the aspect ratio, or leaves the image as is when both are 0).
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParams {
    /// Asset path on the origin
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// 0-100, fractional values allowed
    pub quality: f32,
}

impl FromStr for TransformParams {
    type Err = ProxyError;

    /// Parse a raw query string such as `url=/cat.jpg&w=400&q=80`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawParams = serde_urlencoded::from_str(s)
            .map_err(|e| ProxyError::ClientInput(format!("malformed query: {}", e)))?;

        let source = match raw.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return Err(ProxyError::ClientInput("query `url` is empty".into())),
        };

        let width = dimension("w", raw.w.as_deref())?;
        let height = dimension("h", raw.h.as_deref())?;

        let quality = match raw.q.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_QUALITY,
            Some(q) => match q.parse::<f32>() {
                Ok(q) if q.is_finite() && (0.0..=100.0).contains(&q) => q,
                _ => {
                    return Err(ProxyError::ClientInput(format!(
                        "query `q` must be a number in 0..=100, got {:?}",
                        q
                    )))
                }
            },
        };

        Ok(Self { source, width, height, quality })
    }
}

fn dimension(name: &str, value: Option<&str>) -> Result<u32, ProxyError> {
    match value.map(str::trim) {
        None | Some("") => Ok(0),
        Some(v) => v.parse::<u32>().map_err(|_| {
            ProxyError::ClientInput(format!(
                "query `{}` must be a non-negative integer, got {:?}",
                name, v
            ))
        }),
    }
}
