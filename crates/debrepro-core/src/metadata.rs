//! Reference build metadata.
//!
//! The reference site publishes one status page per package and, linked from
//! it, the `.buildinfo` of the reference build. [`MetadataFetcher`] reads
//! both and assembles a [`PackageTarget`]. Parsing is split into pure
//! functions so every field rule is testable without the network.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::config::ReproConfig;
use crate::domain::{BuildDependency, BuildTimestamp, Checksum, PackageTarget};
use crate::http::{resolve_url, HttpError, PageSource};

/// Structural problems in a fetched page.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("field {0} is empty")]
    EmptyField(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Why metadata for a package could not be obtained.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },
}

/// What the status page tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPage {
    pub build_time: BuildTimestamp,
    pub buildinfo_url: String,
}

/// Fields extracted from a `.buildinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub short_version: String,
    pub binary_name: String,
    pub source_dir: String,
    pub artifact: Option<String>,
    pub expected_hash: Option<Checksum>,
    pub expected_size: Option<u64>,
    pub dependencies: Vec<BuildDependency>,
}

impl BuildInfo {
    pub fn into_target(self, name: &str, build_time: BuildTimestamp) -> PackageTarget {
        PackageTarget {
            name: name.to_string(),
            version: self.version,
            short_version: self.short_version,
            binary_name: self.binary_name,
            source_dir: self.source_dir,
            artifact: self.artifact,
            expected_hash: self.expected_hash,
            expected_size: self.expected_size,
            dependencies: self.dependencies,
            build_time,
        }
    }
}

/// Fetches reference metadata for packages.
pub struct MetadataFetcher {
    pages: Arc<dyn PageSource>,
    reference_base: String,
    suite: String,
    arch: String,
}

impl MetadataFetcher {
    pub fn new(pages: Arc<dyn PageSource>, reference_base: &str, suite: &str, arch: &str) -> Self {
        Self {
            pages,
            reference_base: reference_base.trim_end_matches('/').to_string(),
            suite: suite.to_string(),
            arch: arch.to_string(),
        }
    }

    pub fn from_config(pages: Arc<dyn PageSource>, config: &ReproConfig) -> Self {
        Self::new(pages, &config.reference_base, &config.suite, &config.arch)
    }

    /// Status page URL of `name`.
    pub fn status_url(&self, name: &str) -> String {
        format!(
            "{}/debian/rb-pkg/{}/{}/{}.html",
            self.reference_base, self.suite, self.arch, name
        )
    }

    /// Fetch and parse everything known about the reference build of `name`.
    pub async fn fetch(&self, name: &str) -> Result<PackageTarget, FetchError> {
        let status_url = self.status_url(name);
        let status_html = self.pages.get_text(&status_url).await?;
        let status =
            parse_status_page(&status_html, &status_url).map_err(|source| FetchError::Parse {
                url: status_url.clone(),
                source,
            })?;
        debug!(package = %name, build_time = %status.build_time, "Parsed status page");

        let buildinfo = self.pages.get_text(&status.buildinfo_url).await?;
        let info = parse_buildinfo(&buildinfo, name).map_err(|source| FetchError::Parse {
            url: status.buildinfo_url.clone(),
            source,
        })?;
        Ok(info.into_target(name, status.build_time))
    }
}

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("bad pattern {pattern}: {e}")))
}

fn build_time_span() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r#"(?is)<span[^>]*class\s*=\s*"[^"]*\bbuild-time\b[^"]*"[^>]*>(.*?)</span>"#,
    )
}

fn timestamp() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}(?::\d{2})?")
}

fn anchor_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?is)<a\b[^>]*>")
}

fn tag_attribute() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r#"(?i)\b([a-z][a-z0-9_:-]*)\s*=\s*"([^"]*)""#)
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    tag_attribute()
        .captures_iter(tag)
        .find(|c| c[1].eq_ignore_ascii_case(name))
        .map(|c| decode_entities(&c[2]))
}

/// Extract the build time and build-info link from a status page.
pub fn parse_status_page(html: &str, page_url: &str) -> Result<StatusPage, ParseError> {
    let span = build_time_span()
        .captures(html)
        .ok_or_else(|| ParseError::FieldNotFound("build-time".to_string()))?;
    let stamp = timestamp()
        .find(&span[1])
        .ok_or_else(|| ParseError::InvalidValue {
            field: "build-time".to_string(),
            value: strip_tags(&span[1]).trim().to_string(),
        })?;
    let build_time =
        BuildTimestamp::parse(stamp.as_str()).map_err(|_| ParseError::InvalidValue {
            field: "build-time".to_string(),
            value: stamp.as_str().to_string(),
        })?;

    let href = anchor_tag()
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| attribute(tag, "title").as_deref() == Some("Show: build info"))
        .find_map(|tag| attribute(tag, "href"))
        .ok_or_else(|| ParseError::FieldNotFound("build info link".to_string()))?;
    let buildinfo_url = resolve_url(page_url, &href).map_err(|_| ParseError::InvalidValue {
        field: "build info link".to_string(),
        value: href.clone(),
    })?;

    Ok(StatusPage {
        build_time,
        buildinfo_url,
    })
}

/// Remove HTML markup, keeping text content.
pub fn strip_tags(html: &str) -> String {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let text = compiled(&CELL, r"(?s)<[^>]*>").replace_all(html, "");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn looks_like_html(text: &str) -> bool {
    let head = text.get(..text.len().min(512)).unwrap_or(text).to_ascii_lowercase();
    head.contains("<html") || head.contains("<pre") || head.contains("<!doctype")
}

/// Fields of a deb822 document. Multi-line values keep their line breaks.
#[derive(Debug, Default, Clone)]
pub struct Deb822 {
    fields: HashMap<String, String>,
}

impl Deb822 {
    pub fn parse(text: &str) -> Self {
        static CELL: OnceLock<Regex> = OnceLock::new();
        let field_line = compiled(&CELL, r"^([A-Za-z0-9][A-Za-z0-9-]*):(.*)$");

        let mut fields: HashMap<String, String> = HashMap::new();
        let mut current: Option<String> = None;
        for line in text.lines() {
            if line.trim().is_empty() || line.starts_with("-----") {
                current = None;
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(value) = current.as_ref().and_then(|key| fields.get_mut(key)) {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                continue;
            }
            match field_line.captures(line) {
                Some(caps) => {
                    let key = caps[1].to_ascii_lowercase();
                    if fields.contains_key(&key) {
                        // First paragraph wins.
                        current = None;
                    } else {
                        fields.insert(key.clone(), caps[2].trim().to_string());
                        current = Some(key);
                    }
                }
                None => current = None,
            }
        }
        Self { fields }
    }

    /// Value of `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<&str, ParseError> {
        self.get(name)
            .ok_or_else(|| ParseError::FieldNotFound(name.to_string()))
    }

    fn require_word(&self, name: &str) -> Result<&str, ParseError> {
        self.require(name)?
            .split_whitespace()
            .next()
            .ok_or_else(|| ParseError::EmptyField(name.to_string()))
    }
}

/// Parse a `.buildinfo` (plain or HTML-rendered) for the package `requested`.
pub fn parse_buildinfo(body: &str, requested: &str) -> Result<BuildInfo, ParseError> {
    let text = if looks_like_html(body) {
        strip_tags(body)
    } else {
        body.to_string()
    };
    let doc = Deb822::parse(&text);

    let version = doc.require_word("Version")?.to_string();
    let short_version = version
        .split_once(':')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| version.clone());

    let binaries: Vec<&str> = doc.require("Binary")?.split_whitespace().collect();
    let binary_name = select_binary(&binaries, requested)
        .ok_or_else(|| ParseError::EmptyField("Binary".to_string()))?;

    let source_dir = doc.require_word("Source")?.to_string();
    let dependencies = parse_dependencies(doc.require("Installed-Build-Depends")?)?;

    let reference = match doc.get("Checksums-Sha256") {
        Some(value) => find_checksum(value, &binary_name, &short_version)?,
        None => None,
    };
    let (artifact, expected_hash, expected_size) = match reference {
        Some((file, hash, size)) => (Some(file), Some(hash), Some(size)),
        None => (None, None, None),
    };

    Ok(BuildInfo {
        version,
        short_version,
        binary_name,
        source_dir,
        artifact,
        expected_hash,
        expected_size,
        dependencies,
    })
}

/// The requested name, then `name1` (library soname packages), then the first binary.
fn select_binary(binaries: &[&str], requested: &str) -> Option<String> {
    let soname = format!("{requested}1");
    binaries
        .iter()
        .find(|b| **b == requested)
        .or_else(|| binaries.iter().find(|b| **b == soname))
        .or_else(|| binaries.first())
        .map(|b| b.to_string())
}

fn find_checksum(
    value: &str,
    binary: &str,
    short_version: &str,
) -> Result<Option<(String, Checksum, u64)>, ParseError> {
    let prefix = format!("{binary}_{short_version}_");
    for line in value.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        let [hash, size, file] = words.as_slice() else {
            continue;
        };
        if !(file.starts_with(&prefix) && file.ends_with(".deb")) {
            continue;
        }
        let hash = Checksum::parse(hash).map_err(|_| ParseError::InvalidValue {
            field: "Checksums-Sha256".to_string(),
            value: line.trim().to_string(),
        })?;
        let size = size.parse::<u64>().map_err(|_| ParseError::InvalidValue {
            field: "Checksums-Sha256".to_string(),
            value: line.trim().to_string(),
        })?;
        return Ok(Some((file.to_string(), hash, size)));
    }
    Ok(None)
}

/// `pkg (= version), other (= version), ...` in listed order.
pub fn parse_dependencies(value: &str) -> Result<Vec<BuildDependency>, ParseError> {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let entry = compiled(&CELL, r"^(\S+?)\s*(?:\(\s*=\s*([^)\s]+)\s*\))?$");

    value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| {
            let caps = entry
                .captures(e)
                .ok_or_else(|| ParseError::InvalidValue {
                    field: "Installed-Build-Depends".to_string(),
                    value: e.to_string(),
                })?;
            Ok(BuildDependency::new(
                &caps[1],
                caps.get(2).map(|m| m.as_str().to_string()),
            ))
        })
        .collect()
}
