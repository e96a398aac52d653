use std::fmt;
use std::str::FromStr;

use regex::Regex;
use url::Url;

use crate::error::RunaError;

/// Address of one album image. Either an absolute URL or a path relative
/// to the configured base origin. The archive entry name is the text after
/// the last `/`, so a locator whose final segment is empty is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Archive entry name derived from the locator.
    pub fn entry_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Absolute fetch URL, joining relative locators against `base`.
    pub fn resolve(&self, base: &Url) -> Result<Url, RunaError> {
        match Url::parse(&self.0) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => base
                .join(&self.0)
                .map_err(|_| RunaError::InvalidLocator(self.0.clone())),
            Err(_) => Err(RunaError::InvalidLocator(self.0.clone())),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Locator {
    type Err = RunaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(RunaError::InvalidLocator(value.to_string()));
        }
        let candidate = Self(trimmed.to_string());
        if candidate.entry_name().is_empty() {
            return Err(RunaError::InvalidLocator(value.to_string()));
        }
        Ok(candidate)
    }
}

/// Identifier of one album view. Appears in the DOM as the container id
/// `map-<view id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewId(String);

impl ViewId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn container_id(&self) -> String {
        format!("map-{}", self.0)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ViewId {
    type Err = RunaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let re = Regex::new(r"^[A-Za-z0-9._-]+$").unwrap();
        if !re.is_match(trimmed) {
            return Err(RunaError::InvalidViewId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Photo location in longitude/latitude order, matching the wire payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Result<Self, RunaError> {
        let in_range = lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat);
        if !in_range {
            return Err(RunaError::InvalidCoordinate(format!("[{lon}, {lat}]")));
        }
        Ok(Self { lon, lat })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lon, self.lat)
    }
}

/// Axis-aligned box enclosing a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn point(coordinate: Coordinate) -> Self {
        Self {
            west: coordinate.lon,
            south: coordinate.lat,
            east: coordinate.lon,
            north: coordinate.lat,
        }
    }

    pub fn extend(&mut self, coordinate: Coordinate) {
        self.west = self.west.min(coordinate.lon);
        self.south = self.south.min(coordinate.lat);
        self.east = self.east.max(coordinate.lon);
        self.north = self.north.max(coordinate.lat);
    }

    /// `None` when the slice is empty; a degenerate point box for one entry.
    pub fn enclosing(coordinates: &[Coordinate]) -> Option<Self> {
        let (first, rest) = coordinates.split_first()?;
        let mut bounds = Self::point(*first);
        for coordinate in rest {
            bounds.extend(*coordinate);
        }
        Some(bounds)
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        (self.west..=self.east).contains(&coordinate.lon)
            && (self.south..=self.north).contains(&coordinate.lat)
    }
}
