//! SLD style-document transduction.
//!
//! Extracts paint parameters from an uploaded Styled Layer Descriptor with
//! targeted pattern matching rather than a schema-validating XML parse, so
//! minor dialect variation (namespaced `se:` tags vs. plain tags) is
//! tolerated. The output is a small rule set the style resolver turns into a
//! declarative paint object.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

pub const DEFAULT_COLOR: &str = "#690000";
pub const DEFAULT_FILL_OPACITY: f64 = 0.6;
pub const DEFAULT_LINE_WIDTH: f64 = 1.0;

static COLOR_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<[^>]+name\s*=\s*"(fill|stroke)"[^>]*>([^<]+)<"#).unwrap()
});
static OPACITY_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<[^>]+name\s*=\s*"(fill-opacity|stroke-opacity)"[^>]*>([^<]+)<"#)
        .unwrap()
});
static WIDTH_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<[^>]+name\s*=\s*"stroke-width"[^>]*>([^<]+)<"#).unwrap()
});
static RULE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*se:Rule[^>]*>(.*?)</\s*se:Rule\s*>|<\s*Rule[^>]*>(.*?)</\s*Rule\s*>")
        .unwrap()
});
static FILTER_EQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<[^>]*PropertyIsEqualTo[^>]*>.*?<[^>]*PropertyName[^>]*>([^<]+)<.*?<[^>]*Literal[^>]*>([^<]+)<.*?</[^>]*PropertyIsEqualTo>",
    )
    .unwrap()
});

/// One symbolizer rule, optionally scoped by an attribute equality filter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleRule {
    pub attribute_name: Option<String>,
    pub attribute_value: Option<String>,
    pub fill_color: Option<String>,
    pub stroke_color: Option<String>,
    pub fill_opacity: Option<f64>,
    pub stroke_width: Option<f64>,
}

/// Global paint parameters plus per-rule overrides.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedStyle {
    pub fill_color: Option<String>,
    pub stroke_color: Option<String>,
    pub fill_opacity: Option<f64>,
    pub stroke_width: Option<f64>,
    pub rules: Vec<StyleRule>,
}

/// Parses an SLD document into its paint parameters and rule blocks.
pub fn parse_style_document(xml: &str) -> ParsedStyle {
    let text = xml.trim();
    // Global parameters are read with rule blocks removed, so a color that
    // only appears inside a rule stays scoped to that rule.
    let global = RULE_BLOCK.replace_all(text, "");
    let fill_opacity = extract_opacity(&global, "fill-opacity")
        // Stroke opacity stands in when no fill opacity was given.
        .or_else(|| extract_opacity(&global, "stroke-opacity"));

    ParsedStyle {
        fill_color: extract_color(&global, "fill").and_then(|c| normalize_color(&c)),
        stroke_color: extract_color(&global, "stroke").and_then(|c| normalize_color(&c)),
        fill_opacity,
        stroke_width: extract_width(&global),
        rules: extract_rules(text),
    }
}

fn extract_rules(xml: &str) -> Vec<StyleRule> {
    let mut rules = Vec::new();
    for caps in RULE_BLOCK.captures_iter(xml) {
        let Some(block) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            continue;
        };

        let (attribute_name, attribute_value) = match FILTER_EQ.captures(block) {
            Some(f) => (
                Some(f[1].trim().to_string()),
                Some(f[2].trim().to_string()),
            ),
            None => (None, None),
        };

        let fill_opacity = extract_opacity(block, "fill-opacity")
            .or_else(|| extract_opacity(block, "stroke-opacity"));

        rules.push(StyleRule {
            attribute_name,
            attribute_value,
            fill_color: extract_color(block, "fill").and_then(|c| normalize_color(&c)),
            stroke_color: extract_color(block, "stroke").and_then(|c| normalize_color(&c)),
            fill_opacity,
            stroke_width: extract_width(block),
        });
    }
    rules
}

fn extract_color(xml: &str, param: &str) -> Option<String> {
    COLOR_PARAM
        .captures_iter(xml)
        .find(|caps| caps[1].eq_ignore_ascii_case(param))
        .map(|caps| caps[2].trim().to_string())
}

fn extract_opacity(xml: &str, param: &str) -> Option<f64> {
    OPACITY_PARAM
        .captures_iter(xml)
        .filter(|caps| caps[1].eq_ignore_ascii_case(param))
        .find_map(|caps| caps[2].trim().parse().ok())
}

fn extract_width(xml: &str) -> Option<f64> {
    WIDTH_PARAM
        .captures(xml)
        .and_then(|caps| caps[1].trim().parse().ok())
}

/// Normalizes a color literal.
///
/// Hex forms (`#RGB`, `#RRGGBB`, `#RRGGBBAA`) are upper-cased as-is;
/// `rgb(...)`/`rgba(...)` forms are re-encoded as uppercase hex with channels
/// clamped to 0..=255. Anything else passes through unchanged so the caller
/// can render defensively; blank input yields `None`.
pub fn normalize_color(c: &str) -> Option<String> {
    let s = c.trim();
    if s.is_empty() {
        return None;
    }
    if s.starts_with('#') && matches!(s.len(), 4 | 7 | 9) {
        return Some(s.to_uppercase());
    }
    if s.to_lowercase().starts_with("rgb") {
        if let Some(hex) = rgb_to_hex(s) {
            return Some(hex);
        }
    }
    Some(s.to_string())
}

fn rgb_to_hex(s: &str) -> Option<String> {
    let open = s.find('(')?;
    let close = s.rfind(')')?;
    let inside = s.get(open + 1..close)?;
    let parts: Vec<&str> = inside.split(',').collect();
    if parts.len() < 3 {
        return None;
    }
    let mut channels = [0u8; 3];
    for (slot, part) in channels.iter_mut().zip(&parts) {
        let v: i64 = part.trim().parse().ok()?;
        *slot = v.clamp(0, 255) as u8;
    }
    Some(format!(
        "#{:02X}{:02X}{:02X}",
        channels[0], channels[1], channels[2]
    ))
}

/// Builds the conditional color expression
/// `["match", ["get", FIELD], v1, c1, ..., fallback]` from the rule set, or
/// `None` when no rule names an attribute.
///
/// The first attribute-bearing rule picks the discriminating field, which is
/// upper-cased to match the stored property-key convention; every rule's
/// `(value, color)` pair is appended in encounter order.
pub fn build_match_expression(rules: &[StyleRule], fallback: &str) -> Option<Value> {
    let field = rules
        .iter()
        .find_map(|r| r.attribute_name.as_deref())
        .filter(|f| !f.trim().is_empty())?;

    let mut expr = vec![
        json!("match"),
        json!(["get", field.trim().to_uppercase()]),
    ];
    for rule in rules {
        let Some(value) = rule.attribute_value.as_deref() else {
            continue;
        };
        let Some(color) = rule.fill_color.as_deref().or(rule.stroke_color.as_deref())
        else {
            continue;
        };
        expr.push(json!(value));
        expr.push(json!(color));
    }
    expr.push(json!(fallback));
    Some(Value::Array(expr))
}

/// Turns a parsed document into the declarative paint object stored as the
/// layer style: direct paint values plus optional conditional expressions.
pub fn build_style_from_rules(parsed: &ParsedStyle) -> Value {
    let fill = parsed.fill_color.as_deref().unwrap_or(DEFAULT_COLOR);
    let stroke = parsed.stroke_color.as_deref().unwrap_or(fill);
    let fill_opacity = parsed.fill_opacity.unwrap_or(DEFAULT_FILL_OPACITY);
    let line_width = parsed.stroke_width.unwrap_or(DEFAULT_LINE_WIDTH);

    let mut style = Map::new();
    style.insert("fillColor".into(), json!(fill));
    style.insert("lineColor".into(), json!(stroke));
    style.insert("fillOpacity".into(), json!(fill_opacity));
    style.insert("lineWidth".into(), json!(line_width));
    if let Some(expr) = build_match_expression(&parsed.rules, fill) {
        style.insert("fillExpression".into(), expr);
    }
    if let Some(expr) = build_match_expression(&parsed.rules, stroke) {
        style.insert("lineExpression".into(), expr);
    }
    Value::Object(style)
}
