//! Pure rendering of ratings into titles and descriptions.
//!
//! Injection is idempotent: if the rendered text is already present at
//! the configured position, the original field is returned unchanged, so
//! re-enriching an already-enriched document is a no-op.

use crate::config::{FormatConfig, MetadataPart, TemplatePosition};
use crate::providers::ExtraMetadata;

use super::consolidate::ConsolidatedRating;

/// Render the `{rating}` template for a score.
pub fn render_template(template: &str, score: f64) -> String {
    template.replace("{rating}", &format_score(score))
}

/// One-decimal display form ("8.5", "7.0").
pub fn format_score(score: f64) -> String {
    format!("{score:.1}")
}

/// Inject the rendered rating into a title at the configured position.
pub fn apply_to_title(format: &FormatConfig, title: &str, score: f64) -> String {
    let rendered = render_template(&format.template, score);
    join_at_position(format, title, &rendered)
}

/// Build the description metadata line and join it to the original
/// description. Parts render in the configured order, filtered by the
/// include flags, and are joined by the part separator.
pub fn apply_to_description(
    format: &FormatConfig,
    description: Option<&str>,
    rating: &ConsolidatedRating,
    certification: Option<&str>,
    extra: Option<&ExtraMetadata>,
) -> String {
    let line = metadata_line(format, rating, certification, extra);
    let original = description.unwrap_or_default();

    if line.is_empty() {
        return original.to_string();
    }
    if original.is_empty() {
        return line;
    }

    join_at_position(format, original, &line)
}

fn metadata_line(
    format: &FormatConfig,
    rating: &ConsolidatedRating,
    certification: Option<&str>,
    extra: Option<&ExtraMetadata>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    for part in &format.order_of_parts {
        if !format.include.contains(part) {
            continue;
        }
        let rendered = match part {
            MetadataPart::Rating => Some(render_template(&format.template, rating.score)),
            MetadataPart::Votes => rating.votes.map(|v| format!("{} votes", group_digits(v))),
            MetadataPart::Certification => certification.map(str::to_string),
            MetadataPart::SecondaryRatings => secondary_ratings(extra),
            MetadataPart::ReleaseDate => extra
                .and_then(|e| e.release_date.clone())
                .map(|d| format!("Released {d}")),
            MetadataPart::Streaming => extra.and_then(|e| {
                if e.streaming.is_empty() {
                    None
                } else {
                    Some(format!("On {}", e.streaming.join(", ")))
                }
            }),
        };
        if let Some(rendered) = rendered {
            parts.push(rendered);
        }
    }

    parts.join(&format.part_separator)
}

fn secondary_ratings(extra: Option<&ExtraMetadata>) -> Option<String> {
    let extra = extra?;
    let mut scores = Vec::new();
    if let Some(rotten) = extra.rotten_tomatoes {
        scores.push(format!("RT {}%", rotten.round() as i64));
    }
    if let Some(metacritic) = extra.metacritic {
        scores.push(format!("MC {}", metacritic.round() as i64));
    }
    if scores.is_empty() {
        None
    } else {
        Some(scores.join(" / "))
    }
}

fn join_at_position(format: &FormatConfig, original: &str, injected: &str) -> String {
    match format.position {
        TemplatePosition::Prefix => {
            let lead = format!("{injected}{}", format.separator);
            if original.starts_with(&lead) {
                return original.to_string();
            }
            format!("{lead}{original}")
        }
        TemplatePosition::Suffix => {
            let tail = format!("{}{injected}", format.separator);
            if original.ends_with(&tail) {
                return original.to_string();
            }
            format!("{original}{tail}")
        }
    }
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}
