use askama::Template;

use crate::error::{BuildStep, PassError};
use crate::models::{
    pass_metadata::{parse_hex_color, PassMetadata},
    platform::Platform,
    progress::{CardKind, ProgressModel},
};
use crate::services::barcode_policy::{self, ContentDensity};

/// Above this many stamps the card shows a bar instead of glyphs
const MAX_STAMP_GLYPHS: u32 = 30;

const STAMP_COLOR: &str = "#4f46e5";
const MEMBERSHIP_COLOR: &str = "#111827";

struct StampSlot {
    css_class: &'static str,
    glyph: &'static str,
}

#[derive(Template)]
#[template(path = "pwa_card.html")]
struct PwaCardTemplate<'a> {
    business_name: &'a str,
    card_name: &'a str,
    icon_glyph: Option<&'a str>,
    background_color: String,
    fraction: String,
    unit_label: &'static str,
    show_stamps: bool,
    stamps: Vec<StampSlot>,
    percent: u32,
    status_line: String,
    status_class: &'static str,
    reward_description: &'a str,
    description: Option<&'a str>,
    qr_image_src: &'a str,
    issued_card_id: &'a str,
}

fn status_class(progress: &ProgressModel) -> &'static str {
    if progress.expired {
        "expired"
    } else if progress.completed {
        "completed"
    } else {
        "active"
    }
}

fn status_line(progress: &ProgressModel) -> String {
    if progress.expired {
        return "Membership expired".to_string();
    }
    if progress.completed {
        return match progress.card_kind {
            CardKind::Stamp => "Reward unlocked!".to_string(),
            CardKind::Membership => "All sessions used".to_string(),
        };
    }
    let unit = progress.card_kind.unit_label().to_lowercase();
    if progress.remaining == 1 {
        format!("1 {} to go", unit.trim_end_matches('s'))
    } else {
        format!("{} {} to go", progress.remaining, unit)
    }
}

fn stamp_slots(progress: &ProgressModel) -> Vec<StampSlot> {
    (0..progress.total)
        .map(|i| {
            if i < progress.current {
                StampSlot {
                    css_class: "stamp filled",
                    glyph: "✓",
                }
            } else {
                StampSlot {
                    css_class: "stamp",
                    glyph: "",
                }
            }
        })
        .collect()
}

/// Renders the standalone fallback card. All styling is inline and the
/// scannable code arrives as a `data:` URI, so the page needs no network.
pub fn render(
    progress: &ProgressModel,
    metadata: &PassMetadata,
    issued_card_id: &str,
    qr_image_src: &str,
) -> Result<String, PassError> {
    let density = ContentDensity::classify(metadata);
    let config = barcode_policy::select_config(Platform::Pwa, progress.card_kind, density);
    barcode_policy::ensure_valid(Platform::Pwa, &config)?;

    let background_color = metadata
        .brand_color
        .as_deref()
        .and_then(parse_hex_color)
        .map(|(r, g, b)| format!("#{:02x}{:02x}{:02x}", r, g, b))
        .unwrap_or_else(|| match progress.card_kind {
            CardKind::Stamp => STAMP_COLOR.to_string(),
            CardKind::Membership => MEMBERSHIP_COLOR.to_string(),
        });

    let show_stamps = progress.card_kind == CardKind::Stamp && progress.total <= MAX_STAMP_GLYPHS;

    let template = PwaCardTemplate {
        business_name: &metadata.business_name,
        card_name: &metadata.card_name,
        icon_glyph: metadata.icon_glyph.as_deref(),
        background_color,
        fraction: progress.fraction_label(),
        unit_label: progress.card_kind.unit_label(),
        show_stamps,
        stamps: if show_stamps {
            stamp_slots(progress)
        } else {
            Vec::new()
        },
        percent: progress.whole_percent(),
        status_line: status_line(progress),
        status_class: status_class(progress),
        reward_description: &metadata.reward_description,
        description: metadata.description.as_deref(),
        qr_image_src,
        issued_card_id,
    };

    template
        .render()
        .map_err(|e| PassError::build_failed(Platform::Pwa, BuildStep::Render, e))
}
