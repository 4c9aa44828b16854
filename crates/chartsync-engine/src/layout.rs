//! On-disk layout of one addon's working directory
//!
//! ```text
//! <work>/<chart>/
//!   <chart>-<version>.tgz     downloaded, then replaced by the repacked chart
//!   <chart>/                  extracted chart tree
//!   values.yaml               consumer override document
//!   render-values.yaml        overrides injected at render time
//! ```

use std::path::{Path, PathBuf};

use chartsync_core::chart::CHART_FILE;

#[derive(Debug, Clone)]
pub struct ChartLayout {
    dir: PathBuf,
    chart: String,
}

impl ChartLayout {
    pub fn new(work_dir: &Path, chart: &str) -> Self {
        Self {
            dir: work_dir.join(chart),
            chart: chart.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chart_root(&self) -> PathBuf {
        self.dir.join(&self.chart)
    }

    pub fn archive(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.tgz", self.chart, version))
    }

    pub fn override_values(&self) -> PathBuf {
        self.dir.join("values.yaml")
    }

    pub fn render_values(&self) -> PathBuf {
        self.dir.join("render-values.yaml")
    }

    /// Start from an empty directory
    pub fn reset(&self) -> std::io::Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        std::fs::create_dir_all(&self.dir)
    }

    /// The extracted chart tree: `<chart>/` when present, else the first
    /// subdirectory holding a `Chart.yaml`
    pub fn locate_chart_root(&self) -> Option<PathBuf> {
        let expected = self.chart_root();
        if expected.join(CHART_FILE).exists() {
            return Some(expected);
        }
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.join(CHART_FILE).exists())
            .collect();
        dirs.sort();
        dirs.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let layout = ChartLayout::new(Path::new("/work"), "demo");
        assert_eq!(layout.chart_root(), PathBuf::from("/work/demo/demo"));
        assert_eq!(layout.archive("2.3.0"), PathBuf::from("/work/demo/demo-2.3.0.tgz"));
        assert_eq!(layout.override_values(), PathBuf::from("/work/demo/values.yaml"));
    }

    #[test]
    fn test_reset_and_locate() {
        let dir = TempDir::new().unwrap();
        let layout = ChartLayout::new(dir.path(), "demo");

        std::fs::create_dir_all(layout.dir().join("stale")).unwrap();
        layout.reset().unwrap();
        assert!(!layout.dir().join("stale").exists());
        assert!(layout.locate_chart_root().is_none());

        // Archive top-level directory named differently from the addon
        let other = layout.dir().join("demo-chart");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("Chart.yaml"), "name: demo-chart\nversion: 1.0.0\n").unwrap();
        assert_eq!(layout.locate_chart_root(), Some(other));
    }
}
