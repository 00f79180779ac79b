//! Result projection: heterogeneous workflow results into one view model.
//!
//! Backends report the same thing under different keys (English, camelCase,
//! localized). A [`FieldMapping`] lists the aliases; [`project`] picks a full
//! report first, then structured sections, then falls back to raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::first_element;

/// Where the view model's body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionSource {
    FullReport,
    Structured,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub title: Option<String>,
    pub body: String,
    pub sections: Vec<(String, String)>,
    pub source: ProjectionSource,
}

/// A labelled group of alias keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionField {
    pub label: String,
    pub aliases: Vec<String>,
}

impl SectionField {
    pub fn new(label: &str, aliases: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Alias lists consulted by [`project`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub title: Vec<String>,
    pub full_report: Vec<String>,
    pub sections: Vec<SectionField>,
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            title: owned(&["title", "标题", "headline"]),
            full_report: owned(&["full_report", "fullReport", "report", "完整报告"]),
            sections: vec![
                SectionField::new("Content", &["content", "内容", "body", "text"]),
                SectionField::new("Summary", &["summary", "摘要"]),
            ],
        }
    }
}

impl FieldMapping {
    /// Title generation: one or more candidate titles.
    pub fn title() -> Self {
        Self {
            sections: vec![
                SectionField::new("Titles", &["titles", "标题列表", "candidates"]),
                SectionField::new("Keywords", &["keywords", "关键词"]),
            ],
            ..Self::default()
        }
    }

    /// Long-form content generation.
    pub fn content() -> Self {
        Self {
            sections: vec![
                SectionField::new("Content", &["content", "内容", "article", "body"]),
                SectionField::new("Outline", &["outline", "大纲"]),
                SectionField::new("Tags", &["tags", "标签", "hashtags"]),
            ],
            ..Self::default()
        }
    }

    /// Image prompt generation.
    pub fn image_prompt() -> Self {
        Self {
            sections: vec![
                SectionField::new(
                    "Prompt",
                    &["image_prompt", "imagePrompt", "prompt", "图片提示词"],
                ),
                SectionField::new(
                    "Negative prompt",
                    &["negative_prompt", "negativePrompt", "反向提示词"],
                ),
                SectionField::new("Style", &["style", "风格"]),
            ],
            ..Self::default()
        }
    }

    /// Built-in mapping for a profile name; unknown names get the default.
    pub fn for_profile(name: &str) -> Self {
        match name {
            "title" => Self::title(),
            "content" => Self::content(),
            "image-prompt" | "image_prompt" => Self::image_prompt(),
            _ => Self::default(),
        }
    }

    /// Put extra aliases in front of the built-in ones.
    pub fn with_overrides(mut self, title: &[String], full_report: &[String]) -> Self {
        if !title.is_empty() {
            self.title.splice(0..0, title.iter().cloned());
        }
        if !full_report.is_empty() {
            self.full_report.splice(0..0, full_report.iter().cloned());
        }
        self
    }
}

/// Map a result payload into a [`ViewModel`]. Never panics on missing or
/// odd-typed fields.
pub fn project(value: &Value, mapping: &FieldMapping) -> ViewModel {
    let value = match first_element(value.clone()) {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => first_element(parsed),
            _ => {
                return ViewModel {
                    title: None,
                    body: s,
                    sections: Vec::new(),
                    source: ProjectionSource::Raw,
                };
            }
        },
        other => other,
    };

    let title = find_text(&value, &mapping.title);

    if let Some(report) = find_text(&value, &mapping.full_report) {
        return ViewModel {
            title,
            body: report,
            sections: Vec::new(),
            source: ProjectionSource::FullReport,
        };
    }

    let sections: Vec<(String, String)> = mapping
        .sections
        .iter()
        .filter_map(|section| {
            let found = find_value(&value, &section.aliases)?;
            let text = render(found);
            (!text.trim().is_empty()).then(|| (section.label.clone(), text))
        })
        .collect();

    if !sections.is_empty() {
        let body = sections
            .iter()
            .map(|(label, text)| format!("## {label}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        return ViewModel {
            title,
            body,
            sections,
            source: ProjectionSource::Structured,
        };
    }

    let body = match &value {
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    ViewModel {
        title,
        body,
        sections,
        source: ProjectionSource::Raw,
    }
}

fn find_value<'a>(value: &'a Value, aliases: &[String]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| value.get(key.as_str()))
        .find(|v| !is_blank(v))
}

fn find_text(value: &Value, aliases: &[String]) -> Option<String> {
    aliases.iter().find_map(|key| match value.get(key.as_str())? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_title_only_result() {
        let view = project(&json!({"title": "Cats!"}), &FieldMapping::title());
        assert_eq!(view.title.as_deref(), Some("Cats!"));
        assert_eq!(view.source, ProjectionSource::Raw);
        assert!(view.body.contains("Cats!"));
    }

    #[test]
    fn test_full_report_wins() {
        let view = project(
            &json!({"标题": "报告", "完整报告": "全文", "content": "ignored"}),
            &FieldMapping::content(),
        );
        assert_eq!(view.title.as_deref(), Some("报告"));
        assert_eq!(view.body, "全文");
        assert_eq!(view.source, ProjectionSource::FullReport);
        assert!(view.sections.is_empty());
    }

    #[test]
    fn test_structured_sections() {
        let view = project(
            &json!([{
                "imagePrompt": "a cat on a windowsill",
                "negative_prompt": "",
                "style": {"palette": "warm"}
            }]),
            &FieldMapping::image_prompt(),
        );
        assert_eq!(view.source, ProjectionSource::Structured);
        assert_eq!(view.sections.len(), 2);
        assert_eq!(view.sections[0].0, "Prompt");
        assert_eq!(view.sections[0].1, "a cat on a windowsill");
        assert!(view.sections[1].1.contains("warm"));
        assert!(view.body.starts_with("## Prompt"));
    }

    #[test]
    fn test_string_lists_render_as_bullets() {
        let view = project(&json!({"titles": ["A", "B"]}), &FieldMapping::title());
        assert_eq!(view.sections[0].1, "- A\n- B");
    }

    #[test]
    fn test_string_results() {
        let view = project(&json!("just text"), &FieldMapping::default());
        assert_eq!(view.body, "just text");
        assert_eq!(view.source, ProjectionSource::Raw);

        let view = project(&json!(r#"{"full_report":"nested"}"#), &FieldMapping::default());
        assert_eq!(view.body, "nested");
        assert_eq!(view.source, ProjectionSource::FullReport);
    }

    #[test]
    fn test_odd_shapes_do_not_panic() {
        for value in [json!(null), json!(12), json!([]), json!({"title": 5, "content": null})] {
            let view = project(&value, &FieldMapping::default());
            assert!(view.title.is_none());
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mapping = FieldMapping::default().with_overrides(&["name".into()], &["summary_text".into()]);
        let view = project(
            &json!({"name": "Override", "title": "Base", "summary_text": "S"}),
            &mapping,
        );
        assert_eq!(view.title.as_deref(), Some("Override"));
        assert_eq!(view.body, "S");
    }

    #[test]
    fn test_profiles() {
        assert_eq!(FieldMapping::for_profile("title"), FieldMapping::title());
        assert_eq!(FieldMapping::for_profile("image-prompt"), FieldMapping::image_prompt());
        assert_eq!(FieldMapping::for_profile("invoice"), FieldMapping::default());
    }
}
