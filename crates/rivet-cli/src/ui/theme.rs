//! UI Theme - colors and icons shared by the reporter and the tables

use crossterm::style::Color;
use rivet_schema::BinaryStatus;

/// Colors for different UI elements
#[derive(Debug, Clone)]
pub struct ColorScheme {
    /// Package references
    pub reference: Color,
    /// Package ids, remotes and other secondary info
    pub secondary: Color,
    /// Section headers
    pub header: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    /// Running builds and downloads
    pub active: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            reference: Color::Cyan,
            secondary: Color::DarkGrey,
            header: Color::White,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            active: Color::Blue,
        }
    }
}

/// Status icons
#[derive(Debug, Clone)]
pub struct Icons {
    pub active: &'static str,
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            active: "●",
            success: "✓",
            error: "✗",
            warning: "⚠",
            info: "ℹ",
        }
    }
}

/// Default theme
#[derive(Debug, Clone, Default)]
pub struct Theme {
    pub colors: ColorScheme,
    pub icons: Icons,
}

impl Theme {
    /// Color of a binary status.
    pub fn status_color(&self, status: BinaryStatus) -> Color {
        match status {
            BinaryStatus::Cache | BinaryStatus::Skip => self.colors.success,
            BinaryStatus::Download | BinaryStatus::Update | BinaryStatus::Build => self.colors.active,
            BinaryStatus::Missing | BinaryStatus::Invalid => self.colors.error,
            _ => self.colors.secondary,
        }
    }
}

/// First characters of a package id, enough to tell ids apart on screen.
pub fn short_id(package_id: &str) -> &str {
    package_id.get(..12).unwrap_or(package_id)
}
