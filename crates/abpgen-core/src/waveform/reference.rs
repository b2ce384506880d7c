//! Reference-point definitions
//!
//! Reference points are loaded from an XML document laid out as
//!
//! ```xml
//! <heartbeat>
//!     <abp_waveform_features>
//!         <point name="diastolic_start" time_s="0.0" pressure_mmHg="80.0"/>
//!         ...
//!     </abp_waveform_features>
//! </heartbeat>
//! ```
//!
//! Every child of the root is a waveform section keyed by its tag; every child
//! of a section is a point. `time_s` is the fraction of the beat (0..1).

use crate::error::{ConfigError, UnsupportedOperation};
use std::path::{Path, PathBuf};

/// Section holding the arterial pressure anchors
pub const ABP_SECTION: &str = "abp_waveform_features";

/// A named (time-fraction, pressure) anchor of the beat shape
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub name: String,
    /// Position within the beat, 0.0 = beat start, 1.0 = beat end
    pub time_fraction: f64,
    /// mmHg
    pub pressure: f64,
}

impl ReferencePoint {
    pub fn new(name: impl Into<String>, time_fraction: f64, pressure: f64) -> Self {
        Self {
            name: name.into(),
            time_fraction,
            pressure,
        }
    }
}

/// Reference points keyed by name, in load order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferencePoints {
    points: Vec<ReferencePoint>,
}

impl ReferencePoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a point, replacing (in place) any point with the same name
    ///
    /// Returns the replaced point, if any.
    pub fn insert(&mut self, point: ReferencePoint) -> Option<ReferencePoint> {
        match self.points.iter_mut().find(|p| p.name == point.name) {
            Some(existing) => Some(std::mem::replace(existing, point)),
            None => {
                self.points.push(point);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ReferencePoint> {
        self.points.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ReferencePoint> {
        self.points.iter_mut().find(|p| p.name == name)
    }

    /// Point names in load order
    pub fn keys(&self) -> Vec<String> {
        self.points.iter().map(|p| p.name.clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReferencePoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromIterator<ReferencePoint> for ReferencePoints {
    fn from_iter<I: IntoIterator<Item = ReferencePoint>>(iter: I) -> Self {
        let mut points = ReferencePoints::new();
        for point in iter {
            points.insert(point);
        }
        points
    }
}

impl<'a> IntoIterator for &'a ReferencePoints {
    type Item = &'a ReferencePoint;
    type IntoIter = std::slice::Iter<'a, ReferencePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Loads reference points from the HeartBeat settings document
#[derive(Debug, Clone)]
pub struct ReferencePointStore {
    path: PathBuf,
    section: String,
    sections: Vec<(String, ReferencePoints)>,
}

impl ReferencePointStore {
    /// Store reading the ABP section of `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_section(path, ABP_SECTION)
    }

    /// Store reading an arbitrary section of `path`
    pub fn with_section(path: impl Into<PathBuf>, section: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            section: section.into(),
            sections: Vec::new(),
        }
    }

    /// Default document location: `<config_dir>/heartbeat_app/model/heartBeat.xml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heartbeat_app")
            .join("model")
            .join("heartBeat.xml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    /// (Re)load the document and return the configured section
    ///
    /// Fails when the file is missing, unparsable, lacks the section, or the
    /// section holds no points or no point at time 0. On failure the previously loaded data is kept.
    pub fn load(&mut self) -> Result<ReferencePoints, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound(self.path.clone()));
        }
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        let sections = parse_document(&text)?;
        if sections.is_empty() {
            return Err(ConfigError::Empty(self.path.display().to_string()));
        }
        let points = select_section(&sections, &self.section)?;

        tracing::info!(
            path = %self.path.display(),
            section = %self.section,
            points = points.len(),
            "Loaded reference points"
        );
        self.sections = sections;
        Ok(points)
    }

    /// Points of the configured section from the last successful load
    pub fn get(&self) -> Result<ReferencePoints, ConfigError> {
        if self.sections.is_empty() {
            return Err(ConfigError::Empty(format!(
                "{} (not loaded yet)",
                self.path.display()
            )));
        }
        select_section(&self.sections, &self.section)
    }

    /// Point names of the configured section, in load order
    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.get()?.keys())
    }

    /// Names of every section in the last loaded document
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Persisting edited reference points is not implemented
    pub fn save(&self) -> Result<(), UnsupportedOperation> {
        Err(UnsupportedOperation("save_settings()"))
    }
}

fn select_section(
    sections: &[(String, ReferencePoints)],
    section: &str,
) -> Result<ReferencePoints, ConfigError> {
    let points = sections
        .iter()
        .find(|(name, _)| name == section)
        .map(|(_, points)| points.clone())
        .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
    if points.is_empty() {
        return Err(ConfigError::Empty(format!("<{section}> has no points")));
    }
    if !points.iter().any(|p| p.time_fraction == 0.0) {
        return Err(ConfigError::MissingBeatStart(section.to_string()));
    }
    Ok(points)
}

/// Parse a HeartBeat settings document into its sections
pub fn parse_document(text: &str) -> Result<Vec<(String, ReferencePoints)>, ConfigError> {
    let doc = roxmltree::Document::parse(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;

    let mut sections = Vec::new();
    for waveform in doc.root_element().children().filter(|n| n.is_element()) {
        let section = waveform.tag_name().name().to_string();
        let mut points = ReferencePoints::new();

        for point in waveform.children().filter(|n| n.is_element()) {
            let name = point
                .attribute("name")
                .ok_or_else(|| ConfigError::MissingAttribute {
                    section: section.clone(),
                    attribute: "name",
                })?;
            let time_fraction = number_attribute(&point, &section, name, "time_s")?;
            let pressure = number_attribute(&point, &section, name, "pressure_mmHg")?;
            points.insert(ReferencePoint::new(name, time_fraction, pressure));
        }

        sections.push((section, points));
    }
    Ok(sections)
}

fn number_attribute(
    node: &roxmltree::Node<'_, '_>,
    section: &str,
    point: &str,
    attribute: &'static str,
) -> Result<f64, ConfigError> {
    let raw = node
        .attribute(attribute)
        .ok_or_else(|| ConfigError::MissingAttribute {
            section: section.to_string(),
            attribute,
        })?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::InvalidNumber {
            section: section.to_string(),
            point: point.to_string(),
            attribute,
            value: raw.to_string(),
        })
}
