//! Coordinate Reference System handling
//!
//! Tiles carry their CRS through unchanged; TerraFill never reprojects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    /// WKT representation (primary)
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl Crs {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// Get the EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get the WKT representation if known
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.epsg {
            write!(f, "EPSG:{}", code)
        } else if let Some(wkt) = &self.wkt {
            write!(f, "{}", wkt)
        } else {
            write!(f, "unknown CRS")
        }
    }
}
