use url::Url;

use crate::models::bookmark::BookmarkItem;
use crate::models::classification::Classification;

pub const HEURISTIC_CONFIDENCE: f64 = 0.65;
pub const COLLECTIONS_ROOT: &str = "AI Collections";
pub const UNSORTED_TOPIC: &str = "General/Unsorted";
const HEURISTIC_REASON: &str = "URL-based heuristic classification";

/// Host/substring hints, checked in order; first match wins.
const TOPIC_HINTS: &[(&str, &str)] = &[
    ("github.com", "Technology/Development"),
    ("gitlab.com", "Technology/Development"),
    ("stackoverflow.com", "Technology/Development"),
    ("npmjs.com", "Technology/Development"),
    ("pypi.org", "Technology/Development"),
    ("developer.", "Technology/Development"),
    ("docs.", "Reference/Documentation"),
    ("medium.com", "News/Tech"),
    ("cnn.com", "News/General"),
    ("bbc.com", "News/General"),
    ("theverge.com", "Technology/News"),
    ("techcrunch.com", "Technology/News"),
    ("ycombinator.com", "Technology/News"),
    ("arxiv.org", "Education/Research"),
    ("coursera.org", "Education/Courses"),
    ("udemy.com", "Education/Courses"),
    ("khan", "Education/Learning"),
    ("wikipedia.org", "Reference/Encyclopedia"),
    ("amazon.", "Shopping/General"),
    ("ebay.", "Shopping/General"),
    ("etsy.", "Shopping/Crafts"),
    ("shop", "Shopping/General"),
    ("store", "Shopping/General"),
    ("twitter.com", "Social/Twitter"),
    ("linkedin.com", "Social/Professional"),
    ("reddit.com", "Social/Reddit"),
    ("facebook.com", "Social/Facebook"),
    ("figma.com", "Tools/Design"),
    ("notion.so", "Tools/Productivity"),
    ("trello.com", "Tools/Productivity"),
    ("slack.com", "Tools/Communication"),
];

/// Substring groups matched against the lowercased URL, in priority order.
const URL_PATTERNS: &[(&[&str], &str)] = &[
    (&["blog", "news", "article"], "News/Blogs"),
    (
        &["docs", "documentation", "api", "spec", "guide"],
        "Reference/Documentation",
    ),
    (&["shop", "store", "cart", "buy", "product"], "Shopping/General"),
    (&["learn", "course", "tutorial", "education"], "Education/Learning"),
    (&["tool", "app", "software", "service"], "Tools/General"),
    (&["video", "watch", "youtube", "vimeo"], "Entertainment/Videos"),
];

const TLD_TOPICS: &[(&str, &str)] = &[
    ("edu", "Education/Academic"),
    ("gov", "Reference/Government"),
    ("org", "Reference/Organizations"),
];

const TRACKING_PARAMS: &[&str] = &["ref", "fbclid", "gclid"];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalizes a URL into a de-duplication key. Malformed input is returned
/// unchanged.
pub fn canonicalize(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        let trimmed = trimmed.to_string();
        url.set_path(&trimmed);
    }

    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host && url.set_host(Some(&lower)).is_err() {
            return url.to_string();
        }
    }

    url.to_string()
}

/// Derives a "Category/Subcategory" topic from URL patterns alone.
pub fn topic_from_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return UNSORTED_TOPIC.to_string();
    };
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let full = raw.to_lowercase();

    for (hint, topic) in TOPIC_HINTS {
        if host.contains(hint) || full.contains(hint) {
            return topic.to_string();
        }
    }

    for (needles, topic) in URL_PATTERNS {
        if contains_any(&full, needles) {
            return topic.to_string();
        }
    }

    for (tld, topic) in TLD_TOPICS {
        if host.split('.').skip(1).any(|label| label == *tld) {
            return topic.to_string();
        }
    }

    UNSORTED_TOPIC.to_string()
}

pub fn domain_from_url(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(strip_www))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn strip_www(host: &str) -> String {
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// Joins `topic` under `root` unless it already lives there.
pub fn build_path(root: &str, topic: &str) -> String {
    if topic.starts_with(root) {
        topic.to_string()
    } else {
        format!("{root}/{topic}")
    }
}

/// Fallback classification used when the oracle is missing or unsure. It
/// never proposes a title, so `rename_title` is empty.
pub fn heuristic_classification(item: &BookmarkItem) -> Classification {
    let topic = topic_from_url(&item.url);
    Classification {
        suggested_folder: build_path(COLLECTIONS_ROOT, &topic),
        tags: vec![topic.clone()],
        topic,
        rename_title: String::new(),
        confidence: HEURISTIC_CONFIDENCE,
        reasons: vec![HEURISTIC_REASON.to_string()],
    }
}
