//! Per-installation configuration embedded in the URL path.
//!
//! The blob is URL-safe base64 (padding stripped) of UTF-8 JSON. Decoding
//! is pure: base64 → JSON → field-by-field validation with defaulting,
//! producing an immutable [`UserConfig`]. Unknown fields are ignored but
//! still participate in the config hash, which is taken over the
//! canonicalized raw document. A legacy single `format` block seeds both
//! the title and description formats.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::cache::{config_hash, url_hash};

#[derive(Debug, Error)]
pub enum UserConfigError {
    #[error("failed to decode config: {0}")]
    Decode(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectLocation {
    Title,
    Description,
    Both,
}

impl InjectLocation {
    pub fn includes_title(self) -> bool {
        matches!(self, InjectLocation::Title | InjectLocation::Both)
    }

    pub fn includes_description(self) -> bool {
        matches!(self, InjectLocation::Description | InjectLocation::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePosition {
    Prefix,
    Suffix,
}

/// Parts of the description metadata line, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataPart {
    Rating,
    Votes,
    Certification,
    SecondaryRatings,
    ReleaseDate,
    Streaming,
}

impl MetadataPart {
    pub const ALL: [MetadataPart; 6] = [
        MetadataPart::Rating,
        MetadataPart::Votes,
        MetadataPart::Certification,
        MetadataPart::SecondaryRatings,
        MetadataPart::ReleaseDate,
        MetadataPart::Streaming,
    ];

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "rating" => Some(MetadataPart::Rating),
            "votes" => Some(MetadataPart::Votes),
            "certification" => Some(MetadataPart::Certification),
            "secondaryRatings" => Some(MetadataPart::SecondaryRatings),
            "releaseDate" => Some(MetadataPart::ReleaseDate),
            "streaming" => Some(MetadataPart::Streaming),
            _ => None,
        }
    }
}

/// How an injected rating is rendered into a title or description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatConfig {
    pub position: TemplatePosition,
    /// Contains the literal `{rating}` placeholder.
    pub template: String,
    /// Joins the injected text to the original field.
    pub separator: String,
    /// Joins the parts of the description metadata line.
    pub part_separator: String,
    pub apply_to_catalog: bool,
    pub apply_to_episodes: bool,
    /// Which metadata parts are rendered at all.
    pub include: Vec<MetadataPart>,
    /// Rendering order; unknown keys dropped, missing ones appended.
    pub order_of_parts: Vec<MetadataPart>,
}

impl FormatConfig {
    fn default_title() -> Self {
        Self {
            position: TemplatePosition::Prefix,
            template: "★ {rating}".to_string(),
            separator: " | ".to_string(),
            part_separator: " | ".to_string(),
            apply_to_catalog: true,
            apply_to_episodes: true,
            include: MetadataPart::ALL.to_vec(),
            order_of_parts: MetadataPart::ALL.to_vec(),
        }
    }

    fn default_description() -> Self {
        Self {
            position: TemplatePosition::Prefix,
            template: "★ {rating}".to_string(),
            separator: "\n".to_string(),
            part_separator: " | ".to_string(),
            apply_to_catalog: true,
            apply_to_episodes: true,
            include: MetadataPart::ALL.to_vec(),
            order_of_parts: MetadataPart::ALL.to_vec(),
        }
    }
}

/// Immutable per-request configuration. Built once from the URL blob and
/// discarded after the response.
#[derive(Debug, Clone)]
pub struct UserConfig {
    pub upstream_base_url: Url,
    pub display_name: Option<String>,
    pub ratings_enabled: bool,
    pub inject_location: InjectLocation,
    pub title_format: FormatConfig,
    pub description_format: FormatConfig,
    pub metadata_provider: Option<String>,
    pub user_id: Option<String>,
    /// Two-letter region code, lowercase.
    pub region: String,

    /// First 16 hex chars of SHA-256 over the canonicalized raw config.
    pub config_hash: String,
    /// First 12 hex chars of SHA-256 over the upstream base URL.
    pub url_hash: String,
}

impl UserConfig {
    /// Decode and validate a URL-path config blob.
    pub fn decode(blob: &str) -> Result<Self, UserConfigError> {
        // Clients occasionally keep the padding; strip it rather than
        // rejecting.
        let trimmed = blob.trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| UserConfigError::Decode(format!("base64: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| UserConfigError::Decode(format!("utf-8: {e}")))?;
        let raw: Value = serde_json::from_str(&text)
            .map_err(|e| UserConfigError::Decode(format!("json: {e}")))?;

        Self::from_value(&raw)
    }

    /// Build a validated config from a decoded JSON document.
    pub fn from_value(raw: &Value) -> Result<Self, UserConfigError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| UserConfigError::Invalid("config must be a JSON object".into()))?;

        let upstream_raw = obj
            .get("upstream")
            .or_else(|| obj.get("upstreamBaseUrl"))
            .and_then(Value::as_str)
            .ok_or_else(|| UserConfigError::Invalid("upstream is required".into()))?;
        let upstream_base_url = Url::parse(upstream_raw)
            .map_err(|e| UserConfigError::Invalid(format!("upstream: {e}")))?;
        if !matches!(upstream_base_url.scheme(), "http" | "https") {
            return Err(UserConfigError::Invalid(
                "upstream must be an absolute http(s) URL".into(),
            ));
        }

        let display_name = obj
            .get("displayName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty());

        let ratings_enabled = obj
            .get("ratingsEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let inject_location = match obj.get("injectLocation").and_then(Value::as_str) {
            None | Some("title") => InjectLocation::Title,
            Some("description") => InjectLocation::Description,
            Some("both") => InjectLocation::Both,
            Some(other) => {
                return Err(UserConfigError::Invalid(format!(
                    "injectLocation must be one of title|description|both, got {other:?}"
                )));
            }
        };

        // Legacy migration: a single `format` block seeds both formats
        // when the split blocks are absent.
        let legacy = obj.get("format");
        let title_source = obj.get("titleFormat").or(legacy);
        let description_source = obj.get("descriptionFormat").or(legacy);

        let title_format =
            parse_format(title_source, FormatConfig::default_title(), "titleFormat")?;
        let description_format = parse_format(
            description_source,
            FormatConfig::default_description(),
            "descriptionFormat",
        )?;

        let metadata_provider = obj
            .get("metadataProvider")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty());

        let user_id = obj
            .get("userId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty());

        let region = match obj.get("region").and_then(Value::as_str) {
            None => "us".to_string(),
            Some(code) => {
                if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(UserConfigError::Invalid(format!(
                        "region must be a 2-letter code, got {code:?}"
                    )));
                }
                code.to_ascii_lowercase()
            }
        };

        Ok(Self {
            config_hash: config_hash(raw),
            url_hash: url_hash(upstream_base_url.as_str()),
            upstream_base_url,
            display_name,
            ratings_enabled,
            inject_location,
            title_format,
            description_format,
            metadata_provider,
            user_id,
            region,
        })
    }

    pub fn is_user_specific(&self) -> bool {
        self.user_id.is_some()
    }
}

fn parse_format(
    source: Option<&Value>,
    defaults: FormatConfig,
    field: &str,
) -> Result<FormatConfig, UserConfigError> {
    let obj = match source.and_then(Value::as_object) {
        Some(obj) => obj,
        None => return Ok(defaults),
    };

    let position = match obj.get("position").and_then(Value::as_str) {
        None => defaults.position,
        Some("prefix") => TemplatePosition::Prefix,
        Some("suffix") => TemplatePosition::Suffix,
        Some(other) => {
            return Err(UserConfigError::Invalid(format!(
                "{field}.position must be prefix|suffix, got {other:?}"
            )));
        }
    };

    let template = match obj.get("template").and_then(Value::as_str) {
        None => defaults.template,
        Some(template) => {
            if !template.contains("{rating}") {
                return Err(UserConfigError::Invalid(format!(
                    "{field}.template must contain the literal {{rating}}"
                )));
            }
            template.to_string()
        }
    };

    let separator = obj
        .get("separator")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(defaults.separator);

    let part_separator = obj
        .get("partSeparator")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(defaults.part_separator);

    let apply_to_catalog = obj
        .get("applyToCatalog")
        .and_then(Value::as_bool)
        .unwrap_or(defaults.apply_to_catalog);

    let apply_to_episodes = obj
        .get("applyToEpisodes")
        .and_then(Value::as_bool)
        .unwrap_or(defaults.apply_to_episodes);

    let include = match obj.get("includeFlags").and_then(Value::as_array) {
        None => defaults.include,
        Some(flags) => flags
            .iter()
            .filter_map(Value::as_str)
            .filter_map(MetadataPart::from_key)
            .collect(),
    };

    let order_of_parts = match obj.get("orderOfParts").and_then(Value::as_array) {
        None => defaults.order_of_parts,
        Some(order) => {
            // Unknown keys dropped, missing ones appended in canonical
            // order.
            let mut parts: Vec<MetadataPart> = order
                .iter()
                .filter_map(Value::as_str)
                .filter_map(MetadataPart::from_key)
                .collect();
            for part in MetadataPart::ALL {
                if !parts.contains(&part) {
                    parts.push(part);
                }
            }
            parts
        }
    };

    Ok(FormatConfig {
        position,
        template,
        separator,
        part_separator,
        apply_to_catalog,
        apply_to_episodes,
        include,
        order_of_parts,
    })
}
