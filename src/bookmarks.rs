//! Chrome bookmark export model
//!
//! Parses the `Bookmarks` JSON file into typed nodes. Traversal is depth-first
//! pre-order with children in array order; every listing and aggregate in
//! the crate follows that order.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;
use url::Url;

/// Microseconds between 1601-01-01 and 1970-01-01
const CHROME_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Deeper nesting than this means a broken export
const MAX_DEPTH: usize = 512;

/// A bookmark or a folder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BookmarkNode {
    #[serde(rename = "url")]
    Link(Bookmark),
    Folder(Folder),
}

impl BookmarkNode {
    pub fn id(&self) -> &str {
        match self {
            BookmarkNode::Link(b) => &b.id,
            BookmarkNode::Folder(f) => &f.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BookmarkNode::Link(b) => &b.name,
            BookmarkNode::Folder(f) => &f.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bookmark {
    pub id: String,
    pub guid: String,
    pub name: String,
    /// URL exactly as exported
    pub url: String,
    /// None when the URL lacks a scheme or hostname
    #[serde(skip)]
    pub parsed: Option<ParsedUrl>,
    /// Chrome time (µs since 1601-01-01 UTC)
    pub date_added: i64,
    /// Chrome time; 0 means never used
    pub date_last_used: i64,
}

impl Bookmark {
    pub fn is_unvisited(&self) -> bool {
        self.date_last_used == 0
    }

    /// Parsed with an http(s) scheme, so a network probe makes sense
    pub fn is_checkable(&self) -> bool {
        self.parsed
            .as_ref()
            .is_some_and(|p| p.scheme == "http" || p.scheme == "https")
    }

    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        chrome_time_to_datetime(self.date_added)
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        chrome_time_to_datetime(self.date_last_used)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Folder {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    pub name: String,
    pub date_added: i64,
    pub date_last_used: i64,
    pub date_modified: i64,
    pub children: Vec<BookmarkNode>,
}

impl Folder {
    /// All nodes below this folder, pre-order
    pub fn descendants(&self) -> Preorder<'_> {
        Preorder {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// All bookmarks below this folder, pre-order
    pub fn links(&self) -> impl Iterator<Item = &Bookmark> {
        self.descendants().filter_map(|node| match node {
            BookmarkNode::Link(b) => Some(b),
            BookmarkNode::Folder(_) => None,
        })
    }

    /// All folders below this folder, pre-order
    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.descendants().filter_map(|node| match node {
            BookmarkNode::Folder(f) => Some(f),
            BookmarkNode::Link(_) => None,
        })
    }
}

/// Depth-first pre-order iterator
pub struct Preorder<'a> {
    stack: Vec<&'a BookmarkNode>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a BookmarkNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if let BookmarkNode::Folder(folder) = node {
            self.stack.extend(folder.children.iter().rev());
        }
        Some(node)
    }
}

/// Decomposed URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedUrl {
    pub full: String,
    pub scheme: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub query_params: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

/// Parse a bookmark URL; fails when scheme or hostname is missing
pub fn parse_url(raw: &str) -> std::result::Result<ParsedUrl, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    let hostname = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "missing hostname".to_string())?;

    let mut query_params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        query_params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    Ok(ParsedUrl {
        full: raw.to_string(),
        scheme: url.scheme().to_string(),
        hostname: hostname.to_string(),
        port: url.port(),
        path: url.path().to_string(),
        query: url.query().map(String::from),
        query_params,
        fragment: url.fragment().map(String::from),
    })
}

/// A URL that could not be parsed; the bookmark is kept but never checked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidUrl {
    pub id: String,
    pub url: String,
    pub reason: String,
}

/// Result of parsing one export
#[derive(Debug, Clone)]
pub struct ParsedTree {
    pub root: Folder,
    /// Every bookmark, pre-order
    pub links: Vec<Bookmark>,
    /// Non-fatal URL problems
    pub errors: Vec<InvalidUrl>,
}

impl ParsedTree {
    /// Bookmarks the liveness checker can probe
    pub fn checkable(&self) -> impl Iterator<Item = &Bookmark> {
        self.links.iter().filter(|b| b.is_checkable())
    }

    pub fn unvisited(&self) -> impl Iterator<Item = &Bookmark> {
        self.links.iter().filter(|b| b.is_unvisited())
    }

    pub fn stats(&self) -> BookmarkStats {
        BookmarkStats::from_tree(self)
    }
}

/// Parse a whole export (`{"roots": {"bookmark_bar": ...}}`)
pub fn parse_document(doc: &Value) -> Result<ParsedTree> {
    let bar = doc
        .get("roots")
        .and_then(|roots| roots.get("bookmark_bar"))
        .ok_or_else(|| Error::structure("roots", "missing `roots.bookmark_bar`"))?;
    parse_tree(bar)
}

/// Parse an export from its JSON text
pub fn parse_str(json: &str) -> Result<ParsedTree> {
    let doc: Value = serde_json::from_str(json)?;
    parse_document(&doc)
}

/// Parse a bookmark bar root folder
pub fn parse_tree(root: &Value) -> Result<ParsedTree> {
    let obj = root
        .as_object()
        .ok_or_else(|| Error::structure("bookmark_bar", "root is not an object"))?;

    // The bar root is sometimes exported without id/name/type
    let mut root_obj = obj.clone();
    root_obj
        .entry("id")
        .or_insert_with(|| Value::String("bookmark_bar".into()));
    root_obj
        .entry("name")
        .or_insert_with(|| Value::String("Bookmarks Bar".into()));
    root_obj
        .entry("type")
        .or_insert_with(|| Value::String("folder".into()));

    let root = match parse_node(&root_obj, "bookmark_bar", 0)? {
        BookmarkNode::Folder(folder) => folder,
        BookmarkNode::Link(b) => {
            return Err(Error::structure(
                format!("bookmark_bar (id {})", b.id),
                "root must be a folder",
            ))
        }
    };

    let links: Vec<Bookmark> = root.links().cloned().collect();
    let errors = links
        .iter()
        .filter(|b| b.parsed.is_none())
        .map(|b| InvalidUrl {
            id: b.id.clone(),
            url: b.url.clone(),
            reason: parse_url(&b.url)
                .err()
                .unwrap_or_else(|| "unparseable".to_string()),
        })
        .collect();

    Ok(ParsedTree {
        root,
        links,
        errors,
    })
}

fn parse_node(obj: &Map<String, Value>, path: &str, depth: usize) -> Result<BookmarkNode> {
    if depth > MAX_DEPTH {
        return Err(Error::structure(path, "nesting too deep"));
    }

    let label = match obj.get("id").and_then(Value::as_str) {
        Some(id) => format!("{} (id {})", path, id),
        None => path.to_string(),
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("url") => parse_bookmark(obj, &label).map(BookmarkNode::Link),
        Some("folder") => parse_folder(obj, path, &label, depth).map(BookmarkNode::Folder),
        Some(other) => Err(Error::structure(
            label,
            format!("node type must be `url` or `folder`, got `{}`", other),
        )),
        None => Err(Error::structure(label, "node has no `type`")),
    }
}

fn parse_bookmark(obj: &Map<String, Value>, label: &str) -> Result<Bookmark> {
    let url = required_str(obj, "url", label)?;
    let parsed = match parse_url(&url) {
        Ok(parsed) => Some(parsed),
        Err(reason) => {
            warn!(url = %url, %reason, "invalid bookmark URL");
            None
        }
    };

    Ok(Bookmark {
        id: required_str(obj, "id", label)?,
        guid: required_str(obj, "guid", label)?,
        name: required_str(obj, "name", label)?,
        url,
        parsed,
        date_added: required_time(obj, "date_added", label)?,
        date_last_used: required_time(obj, "date_last_used", label)?,
    })
}

fn parse_folder(
    obj: &Map<String, Value>,
    path: &str,
    label: &str,
    depth: usize,
) -> Result<Folder> {
    let children = match obj.get("children") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let child_path = format!("{}/children[{}]", path, i);
                let child_obj = child
                    .as_object()
                    .ok_or_else(|| Error::structure(&child_path, "node is not an object"))?;
                parse_node(child_obj, &child_path, depth + 1)
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(Error::structure(label, "`children` is not an array")),
    };

    Ok(Folder {
        id: required_str(obj, "id", label)?,
        guid: obj.get("guid").and_then(Value::as_str).map(String::from),
        name: required_str(obj, "name", label)?,
        date_added: optional_time(obj, "date_added", label)?,
        date_last_used: optional_time(obj, "date_last_used", label)?,
        date_modified: optional_time(obj, "date_modified", label)?,
        children,
    })
}

fn required_str(obj: &Map<String, Value>, key: &str, label: &str) -> Result<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::structure(label, format!("`{}` is not a string", key))),
        None => Err(Error::structure(label, format!("missing `{}`", key))),
    }
}

fn required_time(obj: &Map<String, Value>, key: &str, label: &str) -> Result<i64> {
    match obj.get(key) {
        Some(value) => time_value(value, key, label),
        None => Err(Error::structure(label, format!("missing `{}`", key))),
    }
}

fn optional_time(obj: &Map<String, Value>, key: &str, label: &str) -> Result<i64> {
    match obj.get(key) {
        Some(value) => time_value(value, key, label),
        None => Ok(0),
    }
}

/// Chrome writes timestamps as decimal strings; accept numbers too
fn time_value(value: &Value, key: &str, label: &str) -> Result<i64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::structure(label, format!("`{}` is not a timestamp", key)))
}

/// Chrome time to UTC; 0 (never) maps to None
pub fn chrome_time_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    if value == 0 {
        return None;
    }
    DateTime::from_timestamp_micros(value.checked_sub(CHROME_EPOCH_OFFSET_MICROS)?)
}

pub fn datetime_to_chrome_time(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros() + CHROME_EPOCH_OFFSET_MICROS
}

/// Aggregate counts over a parsed export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookmarkStats {
    pub total_bookmarks: usize,
    pub total_folders: usize,
    pub empty_folders: usize,
    pub unvisited_bookmarks: usize,
    pub duplicate_urls: usize,
    pub invalid_urls: usize,
    pub unique_hostnames: BTreeMap<String, usize>,
}

impl BookmarkStats {
    pub fn from_tree(tree: &ParsedTree) -> Self {
        let folders: Vec<&Folder> = std::iter::once(&tree.root)
            .chain(tree.root.folders())
            .collect();

        let mut seen = HashSet::new();
        let mut duplicate_urls = 0;
        let mut unique_hostnames: BTreeMap<String, usize> = BTreeMap::new();
        for bookmark in &tree.links {
            let Some(parsed) = &bookmark.parsed else {
                continue;
            };
            if !seen.insert(parsed.full.as_str()) {
                duplicate_urls += 1;
            }
            *unique_hostnames.entry(parsed.hostname.clone()).or_default() += 1;
        }

        Self {
            total_bookmarks: tree.links.len(),
            total_folders: folders.len(),
            empty_folders: folders.iter().filter(|f| f.children.is_empty()).count(),
            unvisited_bookmarks: tree.unvisited().count(),
            duplicate_urls,
            invalid_urls: tree.errors.len(),
            unique_hostnames,
        }
    }

    /// Hostnames by descending count, ties by name
    pub fn top_hostnames(&self, n: usize) -> Vec<(&str, usize)> {
        let mut hosts: Vec<(&str, usize)> = self
            .unique_hostnames
            .iter()
            .map(|(h, c)| (h.as_str(), *c))
            .collect();
        hosts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        hosts.truncate(n);
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(id: &str, url: &str, last_used: &str) -> Value {
        json!({
            "type": "url",
            "id": id,
            "guid": format!("guid-{}", id),
            "name": format!("Link {}", id),
            "url": url,
            "date_added": "13285932710000000",
            "date_last_used": last_used,
        })
    }

    fn sample() -> Value {
        json!({
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "id": "1",
                    "name": "Bookmarks bar",
                    "children": [
                        link("2", "https://good.example/", "0"),
                        {
                            "type": "folder",
                            "id": "3",
                            "name": "Work",
                            "date_added": "13285932710000000",
                            "children": [
                                link("4", "https://docs.example/a?x=1&x=2#top", "13285932790000000"),
                                link("5", "not a url", "0"),
                                { "type": "folder", "id": "6", "name": "Empty", "children": [] }
                            ]
                        },
                        link("7", "https://good.example/", "0"),
                        link("8", "chrome://settings", "0")
                    ]
                }
            }
        })
    }

    #[test]
    fn test_preorder_links() {
        let tree = parse_document(&sample()).unwrap();
        let ids: Vec<&str> = tree.links.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4", "5", "7", "8"]);

        let all: Vec<&str> = tree.root.descendants().map(|n| n.id()).collect();
        assert_eq!(all, vec!["2", "3", "4", "5", "6", "7", "8"]);
    }

    #[test]
    fn test_invalid_url_is_kept_but_not_checkable() {
        let tree = parse_document(&sample()).unwrap();
        assert_eq!(tree.errors.len(), 1);
        assert_eq!(tree.errors[0].id, "5");
        let checkable: Vec<&str> = tree.checkable().map(|b| b.id.as_str()).collect();
        // chrome:// parses but is not http(s)
        assert_eq!(checkable, vec!["2", "4", "7"]);
    }

    #[test]
    fn test_parsed_url_fields() {
        let parsed = parse_url("https://docs.example:8443/a/b?x=1&x=2&y=3#top").unwrap();
        assert_eq!(parsed.scheme, "https");
        assert_eq!(parsed.hostname, "docs.example");
        assert_eq!(parsed.port, Some(8443));
        assert_eq!(parsed.path, "/a/b");
        assert_eq!(parsed.query.as_deref(), Some("x=1&x=2&y=3"));
        assert_eq!(parsed.query_params["x"], vec!["1", "2"]);
        assert_eq!(parsed.fragment.as_deref(), Some("top"));
        assert!(parse_url("example.com/no-scheme").is_err());
        assert!(parse_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_unknown_node_type_is_fatal() {
        let doc = json!({
            "roots": { "bookmark_bar": {
                "type": "folder", "id": "1", "name": "Bar",
                "children": [
                    link("2", "https://good.example", "0"),
                    { "type": "widget", "id": "99", "name": "Gadget" }
                ]
            }}
        });
        let err = parse_document(&doc).unwrap_err();
        assert!(err.is_structural());
        let message = err.to_string();
        assert!(message.contains("bookmark_bar/children[1]"));
        assert!(message.contains("id 99"));
        assert!(message.contains("widget"));
    }

    #[test]
    fn test_missing_required_field_is_fatal() {
        let mut node = link("2", "https://good.example", "0");
        node.as_object_mut().unwrap().remove("guid");
        let doc = json!({ "roots": { "bookmark_bar": {
            "type": "folder", "id": "1", "name": "Bar", "children": [node]
        }}});
        let err = parse_document(&doc).unwrap_err();
        assert!(err.to_string().contains("missing `guid`"));
    }

    #[test]
    fn test_root_defaults() {
        let doc = json!({ "roots": { "bookmark_bar": { "children": [] } } });
        let tree = parse_document(&doc).unwrap();
        assert_eq!(tree.root.id, "bookmark_bar");
        assert_eq!(tree.root.name, "Bookmarks Bar");
        assert!(tree.links.is_empty());
    }

    #[test]
    fn test_missing_bar() {
        let err = parse_document(&json!({ "roots": {} })).unwrap_err();
        assert!(err.to_string().contains("bookmark_bar"));
    }

    #[test]
    fn test_stats() {
        let tree = parse_document(&sample()).unwrap();
        let stats = tree.stats();
        assert_eq!(stats.total_bookmarks, 5);
        assert_eq!(stats.total_folders, 3);
        assert_eq!(stats.empty_folders, 1);
        assert_eq!(stats.unvisited_bookmarks, 4);
        assert_eq!(stats.duplicate_urls, 1);
        assert_eq!(stats.invalid_urls, 1);
        assert_eq!(stats.unique_hostnames["good.example"], 2);
        assert_eq!(stats.top_hostnames(1), vec![("good.example", 2)]);
    }

    #[test]
    fn test_chrome_time() {
        assert_eq!(chrome_time_to_datetime(0), None);
        let unix_epoch = chrome_time_to_datetime(CHROME_EPOCH_OFFSET_MICROS).unwrap();
        assert_eq!(unix_epoch.timestamp(), 0);

        let dt = chrome_time_to_datetime(13_285_932_710_000_000).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2022-01-06");
        assert_eq!(datetime_to_chrome_time(dt), 13_285_932_710_000_000);
    }

    #[test]
    fn test_numeric_timestamps_accepted() {
        let mut node = link("2", "https://good.example", "0");
        node["date_added"] = json!(13285932710000000i64);
        let doc = json!({ "roots": { "bookmark_bar": {
            "type": "folder", "id": "1", "name": "Bar", "children": [node]
        }}});
        let tree = parse_document(&doc).unwrap();
        assert_eq!(tree.links[0].date_added, 13_285_932_710_000_000);
    }
}
