//! Dependency preparation, rendering and image extraction

use std::path::{Path, PathBuf};

use chartsync_core::{ChartMetadata, ImageSet, extract_images, parse_rendered};
use chartsync_repo::RenderRequest;

use crate::auth::Authenticator;
use crate::config::SyncOptions;
use crate::error::SyncError;
use crate::tools::Tools;

const VENDOR_DIR: &str = "charts";
const ASIDE_SUFFIX: &str = ".skipped";

/// Moves `charts/` out of the way and puts it back on drop
#[derive(Debug)]
pub struct ChartsAside {
    original: PathBuf,
    moved: PathBuf,
}

impl ChartsAside {
    /// `None` when the chart vendors nothing
    pub fn move_aside(chart_root: &Path) -> std::io::Result<Option<Self>> {
        let original = chart_root.join(VENDOR_DIR);
        if !original.is_dir() {
            return Ok(None);
        }
        let moved = chart_root.join(format!("{}{}", VENDOR_DIR, ASIDE_SUFFIX));
        if moved.exists() {
            std::fs::remove_dir_all(&moved)?;
        }
        std::fs::rename(&original, &moved)?;
        tracing::info!(path = %original.display(), "excluding vendored subcharts from render");
        Ok(Some(Self { original, moved }))
    }
}

impl Drop for ChartsAside {
    fn drop(&mut self) {
        if let Err(e) = std::fs::rename(&self.moved, &self.original) {
            tracing::warn!(
                path = %self.original.display(),
                error = %e,
                "cannot restore vendored subcharts"
            );
        }
    }
}

/// What one chart needs rendered
#[derive(Debug, Clone)]
pub struct RenderInput<'a> {
    pub chart_root: &'a Path,
    pub metadata: &'a ChartMetadata,
    pub release: &'a str,
    pub include_dependencies: bool,
    /// Declared subcharts are missing from `charts/` or drift from their constraints
    pub dependency_update: bool,
    /// Where render overrides are written when the chart has any
    pub values_path: &'a Path,
}

/// Images found plus everything that went wrong on the way
#[derive(Debug, Default)]
pub struct RenderOutcome {
    pub images: ImageSet,
    /// Non-fatal stage errors (dependency build, render)
    pub errors: Vec<SyncError>,
    pub warnings: Vec<String>,
}

pub struct RenderStage<'a> {
    tools: &'a Tools,
    options: &'a SyncOptions,
}

impl<'a> RenderStage<'a> {
    pub fn new(tools: &'a Tools, options: &'a SyncOptions) -> Self {
        Self { tools, options }
    }

    /// Render the chart and collect its images. Never fails: a failed render
    /// yields zero images and a `TemplateRender` error.
    pub async fn run(&self, auth: &mut Authenticator, input: &RenderInput<'_>) -> RenderOutcome {
        let mut outcome = RenderOutcome::default();
        let mut request = RenderRequest::new(input.release);

        let _aside = if input.include_dependencies {
            request = self.prepare_dependencies(auth, input, request, &mut outcome).await;
            None
        } else {
            match ChartsAside::move_aside(input.chart_root) {
                Ok(guard) => guard,
                Err(e) => {
                    outcome
                        .warnings
                        .push(format!("cannot exclude vendored subcharts: {}", e));
                    None
                }
            }
        };

        let overrides = self.options.render_values(&input.metadata.name);
        if !overrides.is_empty() {
            match overrides.write_to(input.values_path) {
                Ok(()) => request = request.values_file(input.values_path),
                Err(e) => outcome
                    .warnings
                    .push(format!("cannot write render overrides: {}", e)),
            }
        }

        let stream = match self.tools.charts.render(input.chart_root, &request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "render failed, continuing with zero images");
                outcome.errors.push(SyncError::TemplateRender { message: e.to_string() });
                return outcome;
            }
        };

        let (docs, failures) = parse_rendered(&stream);
        for (idx, e) in failures {
            outcome
                .warnings
                .push(format!("rendered document {} is not valid YAML: {}", idx, e));
        }
        outcome.images = extract_images(&docs);
        tracing::info!(documents = docs.len(), images = outcome.images.len(), "rendered chart");
        outcome
    }

    async fn prepare_dependencies(
        &self,
        auth: &mut Authenticator,
        input: &RenderInput<'_>,
        mut request: RenderRequest,
        outcome: &mut RenderOutcome,
    ) -> RenderRequest {
        let meta = input.metadata;
        if meta.dependencies.is_empty() {
            return request;
        }

        let repos = meta.http_repositories();
        if !repos.is_empty() {
            if let Err(e) = self.tools.charts.add_repositories(&repos).await {
                outcome
                    .warnings
                    .push(format!("cannot add dependency repositories: {}", e));
            }
        }
        for host in meta.oci_hosts() {
            outcome.warnings.extend(auth.ensure(self.tools, &host).await);
        }

        if let Err(e) = self.tools.charts.build_dependencies(input.chart_root).await {
            tracing::warn!(error = %e, "dependency build failed, rendering with dependency update");
            outcome
                .errors
                .push(SyncError::DependencyBuild { message: e.to_string() });
            request = request.with_dependency_update(true);
        } else if input.dependency_update {
            tracing::info!("vendored subcharts incomplete, rendering with dependency update");
            request = request.with_dependency_update(true);
        }

        for condition in meta.conditions() {
            request = request.set(condition, "true");
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartsync_core::{DependencyTree, ErrorKind, MirrorScheme, MirrorTarget};
    use chartsync_repo::ChartTooling;
    use chartsync_repo::mock::{MockChart, MockChartTooling, MockRegistry};
    use std::sync::Arc;
    use tempfile::TempDir;

    const RENDERED: &str = r#"
apiVersion: apps/v1
kind: Deployment
spec:
  template:
    spec:
      containers:
        - name: app
          image: example.io/demo/app:2.3.0
---
apiVersion: batch/v1
kind: Job
spec:
  template:
    spec:
      containers:
        - name: migrate
          image: example.io/demo/app:2.3.0
"#;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        values: PathBuf,
        charts: MockChartTooling,
        tools: Tools,
        options: SyncOptions,
    }

    async fn fixture(chart: MockChart, charts: MockChartTooling) -> Fixture {
        let dir = TempDir::new().unwrap();
        let charts = charts.with_chart("demo", chart);
        let addon = chartsync_core::Addon::new("demo", "https://example/charts").unwrap();
        let archive = charts.download(&addon, "2.3.0", dir.path()).await.unwrap();
        chartsync_core::archive::extract_archive(&archive, dir.path()).unwrap();

        let tools = Tools::new(Arc::new(charts.clone()), Arc::new(MockRegistry::new()));
        let options = SyncOptions::new(MirrorTarget::new("registry.internal", MirrorScheme::Flattened), dir.path());
        Fixture {
            root: dir.path().join("demo"),
            values: dir.path().join("render-values.yaml"),
            _dir: dir,
            charts,
            tools,
            options,
        }
    }

    fn input<'a>(f: &'a Fixture, meta: &'a ChartMetadata, include: bool) -> RenderInput<'a> {
        RenderInput {
            chart_root: &f.root,
            metadata: meta,
            release: "demo",
            include_dependencies: include,
            dependency_update: false,
            values_path: &f.values,
        }
    }

    #[tokio::test]
    async fn test_render_extracts_deduplicated_images() {
        let f = fixture(MockChart::new(["2.3.0"]).rendered(RENDERED), MockChartTooling::new()).await;
        let meta = ChartMetadata::load(&f.root).unwrap();
        let mut auth = Authenticator::default();

        let outcome = RenderStage::new(&f.tools, &f.options)
            .run(&mut auth, &input(&f, &meta, true))
            .await;
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.images.len(), 1);
        assert_eq!(
            outcome.images.iter().next().unwrap().to_string(),
            "example.io/demo/app:2.3.0"
        );
        // No declared dependencies: nothing to build
        assert_eq!(f.charts.operation_counts().builds, 0);
    }

    #[tokio::test]
    async fn test_render_failure_is_zero_images() {
        let f = fixture(
            MockChart::new(["2.3.0"]).render_error("clusterName is required"),
            MockChartTooling::new(),
        )
        .await;
        let meta = ChartMetadata::load(&f.root).unwrap();

        let outcome = RenderStage::new(&f.tools, &f.options)
            .run(&mut Authenticator::default(), &input(&f, &meta, true))
            .await;
        assert!(outcome.images.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].kind(), ErrorKind::TemplateRender);
    }

    #[tokio::test]
    async fn test_failed_build_falls_back_to_dependency_update() {
        let chart = MockChart::new(["2.3.0"]).rendered(RENDERED).chart_yaml_extra(
            "dependencies:\n  - name: redis\n    version: 18.x\n    repository: https://charts.bitnami.com/bitnami\n    condition: redis.enabled\n",
        );
        let f = fixture(chart, MockChartTooling::new().failing_build()).await;
        let meta = ChartMetadata::load(&f.root).unwrap();

        let outcome = RenderStage::new(&f.tools, &f.options)
            .run(&mut Authenticator::default(), &input(&f, &meta, true))
            .await;
        assert_eq!(outcome.errors[0].kind(), ErrorKind::DependencyBuild);
        assert_eq!(outcome.images.len(), 1);

        let request = &f.charts.render_requests()[0];
        assert!(request.dependency_update);
        assert_eq!(request.set_values, vec![("redis.enabled".to_string(), "true".to_string())]);
        assert_eq!(f.charts.operation_counts().repo_adds, 1);
    }

    #[tokio::test]
    async fn test_missing_vendored_subchart_requests_dependency_update() {
        let chart = MockChart::new(["2.3.0"]).rendered(RENDERED).chart_yaml_extra(
            "dependencies:\n  - name: redis\n    version: 18.x\n    repository: https://charts.bitnami.com/bitnami\n",
        );
        let f = fixture(chart, MockChartTooling::new()).await;
        let meta = ChartMetadata::load(&f.root).unwrap();
        let tree = DependencyTree::build(&f.root);
        assert_eq!(tree.missing_vendored(), vec!["redis"]);

        let outcome = RenderStage::new(&f.tools, &f.options)
            .run(
                &mut Authenticator::default(),
                &RenderInput {
                    dependency_update: tree.needs_dependency_update(),
                    ..input(&f, &meta, true)
                },
            )
            .await;
        assert!(outcome.errors.is_empty());
        assert_eq!(f.charts.operation_counts().builds, 1);
        assert!(f.charts.render_requests()[0].dependency_update);
    }

    #[tokio::test]
    async fn test_complete_vendored_subcharts_render_as_is() {
        let chart = MockChart::new(["2.3.0"])
            .rendered(RENDERED)
            .chart_yaml_extra(
                "dependencies:\n  - name: redis\n    version: 18.x\n    repository: https://charts.bitnami.com/bitnami\n",
            )
            .file("charts/redis/Chart.yaml", "apiVersion: v2\nname: redis\nversion: 18.1.0\n");
        let f = fixture(chart, MockChartTooling::new()).await;
        let meta = ChartMetadata::load(&f.root).unwrap();
        let tree = DependencyTree::build(&f.root);

        RenderStage::new(&f.tools, &f.options)
            .run(
                &mut Authenticator::default(),
                &RenderInput {
                    dependency_update: tree.needs_dependency_update(),
                    ..input(&f, &meta, true)
                },
            )
            .await;
        assert!(!f.charts.render_requests()[0].dependency_update);
    }

    #[tokio::test]
    async fn test_excluded_dependencies_are_restored() {
        let chart = MockChart::new(["2.3.0"])
            .rendered(RENDERED)
            .file("charts/redis/Chart.yaml", "apiVersion: v2\nname: redis\nversion: 18.1.0\n");
        let f = fixture(chart, MockChartTooling::new()).await;
        let meta = ChartMetadata::load(&f.root).unwrap();

        {
            let guard = ChartsAside::move_aside(&f.root).unwrap();
            assert!(guard.is_some());
            assert!(!f.root.join("charts").exists());
            assert!(f.root.join("charts.skipped/redis/Chart.yaml").exists());
        }
        assert!(f.root.join("charts/redis/Chart.yaml").exists());

        RenderStage::new(&f.tools, &f.options)
            .run(&mut Authenticator::default(), &input(&f, &meta, false))
            .await;
        assert!(f.root.join("charts/redis/Chart.yaml").exists());
        assert!(!f.root.join("charts.skipped").exists());
        assert_eq!(f.charts.operation_counts().builds, 0);
    }

    #[tokio::test]
    async fn test_builtin_overrides_written_as_values_file() {
        let dir = TempDir::new().unwrap();
        let charts = MockChartTooling::new().with_chart("karpenter", MockChart::new(["1.0.0"]));
        let addon = chartsync_core::Addon::new("karpenter", "oci://public.ecr.aws/karpenter").unwrap();
        let archive = charts.download(&addon, "1.0.0", dir.path()).await.unwrap();
        chartsync_core::archive::extract_archive(&archive, dir.path()).unwrap();

        let tools = Tools::new(Arc::new(charts.clone()), Arc::new(MockRegistry::new()));
        let options = SyncOptions::new(MirrorTarget::new("registry.internal", MirrorScheme::Flattened), dir.path());
        let root = dir.path().join("karpenter");
        let values = dir.path().join("render-values.yaml");
        let meta = ChartMetadata::load(&root).unwrap();

        RenderStage::new(&tools, &options)
            .run(
                &mut Authenticator::default(),
                &RenderInput {
                    chart_root: &root,
                    metadata: &meta,
                    release: "karpenter",
                    include_dependencies: true,
                    dependency_update: false,
                    values_path: &values,
                },
            )
            .await;

        assert_eq!(charts.render_requests()[0].values_files, vec![values.clone()]);
        insta::assert_snapshot!(std::fs::read_to_string(&values).unwrap(), @r"
        settings:
          clusterEndpoint: https://placeholder
          clusterName: placeholder
        ");
    }
}
