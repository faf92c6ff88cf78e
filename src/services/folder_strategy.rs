use url::Url;

use crate::models::bookmark::BookmarkItem;
use crate::models::classification::Classification;
use crate::models::settings::FolderStrategy;
use crate::services::url_service::strip_www;

const DEFAULT_MAIN_CATEGORY: &str = "Reference";
const DOMAIN_TOPIC: &str = "By Domain";
const FLAT_DEFAULT: &str = "General";

const MAIN_CATEGORIES: &[(&str, &str)] = &[
    ("Technology", "Work"),
    ("Programming", "Work"),
    ("Development", "Work"),
    ("Tools", "Work"),
    ("Business", "Work"),
    ("Design", "Work"),
    ("Education", "Learning"),
    ("Courses", "Learning"),
    ("Tutorials", "Learning"),
    ("Documentation", "Learning"),
    ("Research", "Learning"),
    ("Entertainment", "Entertainment"),
    ("Videos", "Entertainment"),
    ("Games", "Entertainment"),
    ("Music", "Entertainment"),
    ("Social", "Entertainment"),
    ("Shopping", "Shopping"),
    ("Products", "Shopping"),
    ("Services", "Shopping"),
    ("News", "Reference"),
    ("Articles", "Reference"),
    ("Resources", "Reference"),
    ("Personal", "Personal"),
    ("Finance", "Personal"),
    ("Health", "Personal"),
    ("Travel", "Personal"),
];

const DOMAIN_ALIASES: &[(&str, &str)] = &[
    ("github.com", "GitHub"),
    ("youtube.com", "YouTube"),
    ("stackoverflow.com", "Stack Overflow"),
    ("medium.com", "Medium"),
    ("amazon.com", "Amazon"),
];

/// Topic substrings for the flat strategy, first match wins.
const FLAT_CATEGORIES: &[(&[&str], &str)] = &[
    (&["Program", "Code", "Tech"], "Programming"),
    (&["Learn", "Course", "Tutorial"], "Learning"),
    (&["Entertainment", "Video", "Game"], "Entertainment"),
    (&["Shop", "Buy"], "Shopping"),
    (&["Work", "Business"], "Work"),
];

/// Lowercased title/URL plus the raw topic, the inputs every subcategory
/// rule looks at.
struct Signals<'a> {
    url: String,
    title: String,
    topic: &'a str,
}

impl Signals<'_> {
    fn url_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.url.contains(needle))
    }

    fn title_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.title.contains(needle))
    }

    fn topic_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.topic.contains(needle))
    }
}

pub fn apply_strategy(
    classification: &Classification,
    item: &BookmarkItem,
    strategy: FolderStrategy,
) -> Classification {
    match strategy {
        FolderStrategy::Simple => apply_simple(classification, item),
        FolderStrategy::Detailed => classification.clone(),
        FolderStrategy::Domain => apply_domain(classification, item),
        FolderStrategy::Flat => apply_flat(classification),
    }
}

fn lookup_main(topic: &str) -> Option<&'static str> {
    MAIN_CATEGORIES
        .iter()
        .find(|(key, _)| *key == topic)
        .map(|(_, main)| *main)
}

/// Raw topic first, then its first and last path segment.
fn main_category(topic: &str) -> &'static str {
    let trimmed = topic.trim();
    lookup_main(trimmed)
        .or_else(|| trimmed.split('/').next().and_then(|s| lookup_main(s.trim())))
        .or_else(|| trimmed.rsplit('/').next().and_then(|s| lookup_main(s.trim())))
        .unwrap_or(DEFAULT_MAIN_CATEGORY)
}

fn subcategory(main: &str, s: &Signals<'_>) -> &'static str {
    match main {
        "Work" => {
            if s.url_has(&["github.com", "stackoverflow.com"])
                || s.title_has(&["code", "programming", "python", "javascript"])
                || s.topic_has(&["Program", "Code", "Development"])
            {
                "Programming"
            } else if s.title_has(&["design"])
                || s.url_has(&["figma", "dribbble"])
                || s.topic_has(&["Design"])
            {
                "Design"
            } else if s.url_has(&["linkedin.com"])
                || s.title_has(&["business"])
                || s.topic_has(&["Business"])
            {
                "Business"
            } else {
                "Tools"
            }
        }
        "Learning" => {
            if s.url_has(&["coursera", "udemy", "edx"]) || s.title_has(&["course"]) {
                "Courses"
            } else if s.url_has(&["github.com", "stackoverflow.com"])
                || s.title_has(&["tutorial", "programming", "code"])
            {
                "Programming"
            } else if s.title_has(&["documentation", "docs"]) || s.url_has(&["docs."]) {
                "Research"
            } else {
                "Tutorials"
            }
        }
        "Entertainment" => {
            if s.url_has(&["youtube.com", "vimeo"]) || s.title_has(&["video", "watch"]) {
                "Videos"
            } else if s.url_has(&["reddit.com", "twitter.com", "facebook.com"])
                || s.title_has(&["social"])
            {
                "Social"
            } else if s.title_has(&["game"]) || s.url_has(&["steam", "gaming"]) {
                "Games"
            } else if s.title_has(&["news"]) || s.url_has(&["news"]) {
                "News"
            } else {
                "Social"
            }
        }
        "Shopping" => {
            if s.url_has(&["amazon.com", "electronics"]) || s.title_has(&["tech", "gadget"]) {
                "Tech"
            } else if s.title_has(&["service"]) || s.url_has(&["subscription"]) {
                "Services"
            } else {
                "General"
            }
        }
        "Reference" => {
            if s.title_has(&["documentation", "api", "reference"]) || s.url_has(&["docs."]) {
                "Documentation"
            } else if s.title_has(&["tool", "calculator", "converter"]) {
                "Tools"
            } else {
                "Resources"
            }
        }
        "Personal" => {
            if s.title_has(&["bank", "finance", "investment"]) || s.url_has(&["bank"]) {
                "Finance"
            } else if s.title_has(&["health", "medical", "fitness"]) {
                "Health"
            } else if s.title_has(&["travel", "hotel", "flight"]) {
                "Travel"
            } else {
                "General"
            }
        }
        _ => "General",
    }
}

fn apply_simple(classification: &Classification, item: &BookmarkItem) -> Classification {
    let main = main_category(&classification.topic);
    let signals = Signals {
        url: item.url.to_lowercase(),
        title: item.title.to_lowercase(),
        topic: &classification.topic,
    };
    let sub = subcategory(main, &signals);
    classification.with_folder(main, format!("{main}/{sub}"))
}

fn apply_domain(classification: &Classification, item: &BookmarkItem) -> Classification {
    let domain = Url::parse(&item.url)
        .ok()
        .and_then(|url| url.host_str().map(strip_www))
        .map(|host| {
            DOMAIN_ALIASES
                .iter()
                .find(|(needle, _)| host.contains(needle))
                .map(|(_, alias)| alias.to_string())
                .unwrap_or(host)
        })
        .unwrap_or_else(|| "Other".to_string());

    classification.with_folder(DOMAIN_TOPIC, format!("{DOMAIN_TOPIC}/{domain}"))
}

fn apply_flat(classification: &Classification) -> Classification {
    let main = FLAT_CATEGORIES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| classification.topic.contains(needle)))
        .map(|(_, main)| *main)
        .unwrap_or(FLAT_DEFAULT);
    classification.with_folder(main, main)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(topic: &str) -> Classification {
        Classification {
            topic: topic.to_string(),
            suggested_folder: format!("Raw/{topic}"),
            tags: vec!["t".to_string()],
            rename_title: "title".to_string(),
            confidence: 0.8,
            reasons: vec!["r".to_string()],
        }
    }

    fn item(title: &str, url: &str) -> BookmarkItem {
        BookmarkItem::new("1", title, url, "1")
    }

    #[test]
    fn simple_maps_programming_on_github() {
        let out = apply_strategy(
            &classification("Programming"),
            &item("x", "https://github.com/x"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.topic, "Work");
        assert_eq!(out.suggested_folder, "Work/Programming");
        assert_eq!(out.tags, vec!["t"]);
    }

    #[test]
    fn simple_defaults_to_reference() {
        let out = apply_strategy(
            &classification("Cooking"),
            &item("Best API reference", "https://example.com"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.suggested_folder, "Reference/Documentation");

        let out = apply_strategy(
            &classification("Cooking"),
            &item("Recipes", "https://example.com"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.suggested_folder, "Reference/Resources");
    }

    #[test]
    fn simple_resolves_heuristic_two_level_topics() {
        let out = apply_strategy(
            &classification("Technology/Development"),
            &item("GitHub - microsoft/vscode", "https://github.com/microsoft/vscode"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.suggested_folder, "Work/Programming");

        let out = apply_strategy(
            &classification("Education/Courses"),
            &item("Machine learning course", "https://coursera.org/ml"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.suggested_folder, "Learning/Courses");
    }

    #[test]
    fn simple_subcategory_order_is_fixed() {
        // Programming signal beats design signal.
        let out = apply_strategy(
            &classification("Design"),
            &item("Design systems code", "https://figma.com/file"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.suggested_folder, "Work/Programming");

        let out = apply_strategy(
            &classification("Tools"),
            &item("Team chat", "https://slack.com"),
            FolderStrategy::Simple,
        );
        assert_eq!(out.suggested_folder, "Work/Tools");
    }

    #[test]
    fn detailed_is_identity() {
        let input = classification("Programming");
        let out = apply_strategy(&input, &item("x", "https://x.com"), FolderStrategy::Detailed);
        assert_eq!(out, input);
    }

    #[test]
    fn domain_groups_by_host_with_aliases() {
        let out = apply_strategy(
            &classification("x"),
            &item("x", "https://www.github.com/rust-lang"),
            FolderStrategy::Domain,
        );
        assert_eq!(out.topic, "By Domain");
        assert_eq!(out.suggested_folder, "By Domain/GitHub");

        let out = apply_strategy(
            &classification("x"),
            &item("x", "https://www.rust-lang.org/"),
            FolderStrategy::Domain,
        );
        assert_eq!(out.suggested_folder, "By Domain/rust-lang.org");

        let out = apply_strategy(&classification("x"), &item("x", "nope"), FolderStrategy::Domain);
        assert_eq!(out.suggested_folder, "By Domain/Other");
    }

    #[test]
    fn flat_uses_first_matching_substring() {
        let cases = [
            ("Technology/Development", "Programming"),
            ("Education/Courses", "Learning"),
            ("Entertainment/Videos", "Entertainment"),
            ("Shopping/General", "Shopping"),
            ("Business", "Work"),
            ("Personal/Finance", "General"),
        ];
        for (topic, expected) in cases {
            let out = apply_strategy(
                &classification(topic),
                &item("x", "https://x.com"),
                FolderStrategy::Flat,
            );
            assert_eq!(out.suggested_folder, expected, "topic {topic}");
            assert_eq!(out.topic, expected);
        }
    }
}
