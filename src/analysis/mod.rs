use std::{fmt, path::Path, str::FromStr, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tokio::{fs as tokio_fs, sync::mpsc::UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

pub mod visualize;

use crate::embedding::Embedder;
use crate::scholar::{AuthorRecord, FetchOutcome, ScholarSource};

/// Publication titles are embedded in fixed-size batches so one author's
/// long record never produces an oversized embedding request.
pub const PUBLICATION_BATCH_SIZE: usize = 5;

/// Common stem for every result artifact of one run.
pub const OUTPUT_PREFIX: &str = "course_expertise";

const HEATMAP_SUFFIX: &str = "_heatmap";

/// Reduction applied across a scholar's publication-to-course similarities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Sum,
    Mean,
    Max,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Sum => "sum",
            Method::Mean => "mean",
            Method::Max => "max",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "sum" => Ok(Method::Sum),
            "mean" => Ok(Method::Mean),
            "max" => Ok(Method::Max),
            other => bail!("unsupported aggregation method '{other}', expected sum, mean, or max"),
        }
    }
}

/// Cosine similarity between two embedding vectors. Mismatched or degenerate
/// inputs score 0.0 instead of erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Folds publication batches into one per-course score vector.
///
/// `Sum` and `Max` compose associatively across batches. `Mean` is kept as a
/// running sum and divided by the total publication count in [`finish`],
/// which stays correct for unequal batch sizes.
///
/// [`finish`]: ScoreAccumulator::finish
pub struct ScoreAccumulator {
    method: Method,
    totals: Vec<f32>,
    publications: usize,
}

impl ScoreAccumulator {
    pub fn new(method: Method, course_count: usize) -> Self {
        Self {
            method,
            totals: vec![0.0; course_count],
            publications: 0,
        }
    }

    pub fn fold_batch(&mut self, pub_vectors: &[Vec<f32>], course_vectors: &[Vec<f32>]) {
        for pub_vector in pub_vectors {
            let first = self.publications == 0;
            for (total, course_vector) in self.totals.iter_mut().zip(course_vectors.iter()) {
                let similarity = cosine_similarity(pub_vector, course_vector);
                match self.method {
                    Method::Sum | Method::Mean => *total += similarity,
                    Method::Max => {
                        *total = if first { similarity } else { total.max(similarity) };
                    }
                }
            }
            self.publications += 1;
        }
    }

    /// No publications folded yields an all-zero vector regardless of method.
    pub fn finish(self) -> Vec<f32> {
        match self.method {
            Method::Mean if self.publications > 0 => {
                let count = self.publications as f32;
                self.totals.iter().map(|total| total / count).collect()
            }
            _ => self.totals,
        }
    }
}

/// One-shot reduction of a full publication matrix against the course matrix.
pub fn aggregate(
    pub_vectors: &[Vec<f32>],
    course_vectors: &[Vec<f32>],
    method: Method,
) -> Vec<f32> {
    let mut accumulator = ScoreAccumulator::new(method, course_vectors.len());
    accumulator.fold_batch(pub_vectors, course_vectors);
    accumulator.finish()
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub display_name: String,
    pub sort_key: String,
    pub scores: Vec<f32>,
}

/// Author-by-course score matrix with a fixed course ordering.
#[derive(Debug, Clone)]
pub struct ScoreTable {
    pub courses: Vec<String>,
    pub rows: Vec<ScoreRow>,
}

impl ScoreTable {
    fn sort_rows(&mut self) {
        self.rows.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;

        let mut header = Vec::with_capacity(self.courses.len() + 1);
        header.push(String::new());
        header.extend(self.courses.iter().cloned());
        writer
            .write_record(&header)
            .context("failed to write CSV header")?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(row.scores.len() + 1);
            record.push(row.display_name.clone());
            record.extend(row.scores.iter().map(|score| score.to_string()));
            writer
                .write_record(&record)
                .with_context(|| format!("failed to write CSV row for {}", row.display_name))?;
        }

        writer.flush().context("failed to flush CSV writer")?;
        Ok(())
    }
}

/// File names (relative to the output directory) of one run's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFileGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
}

/// Fired once per scholar, before any work for that scholar starts.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub index: usize,
    pub scholar_id: String,
}

/// Orchestrates one analysis run: embed the course list once, score each
/// scholar's publications against it, persist the table and heatmap.
pub struct AnalysisPipeline {
    embedder: Arc<dyn Embedder>,
    scholars: Arc<dyn ScholarSource>,
}

impl AnalysisPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, scholars: Arc<dyn ScholarSource>) -> Self {
        Self { embedder, scholars }
    }

    /// Runs the full pipeline. A course-embedding failure or a CSV write
    /// failure is fatal; everything per-scholar is isolated, and a heatmap
    /// rendering failure degrades the result group to the CSV alone.
    pub async fn run(
        &self,
        courses: &[String],
        scholar_ids: &[String],
        method: Method,
        output_dir: &Path,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Result<(ScoreTable, ResultFileGroup)> {
        let course_vectors = self
            .embedder
            .embed(courses)
            .await
            .context("failed to embed course list")?;
        if course_vectors.len() != courses.len() {
            bail!(
                "embedding service returned {} vectors for {} courses",
                course_vectors.len(),
                courses.len()
            );
        }

        let mut table = ScoreTable {
            courses: courses.to_vec(),
            rows: Vec::new(),
        };

        for (index, scholar_id) in scholar_ids.iter().enumerate() {
            if let Some(tx) = &progress {
                let _ = tx.send(ProgressEvent {
                    index,
                    scholar_id: scholar_id.clone(),
                });
            }

            let author = match self.scholars.fetch(scholar_id).await {
                FetchOutcome::Author {
                    name,
                    publication_titles,
                } => AuthorRecord::new(&name, publication_titles),
                FetchOutcome::Failed { scholar_id, cause } => {
                    warn!(%scholar_id, %cause, "skipping scholar after fetch failure");
                    continue;
                }
            };

            let scores = match self.score_author(&author, &course_vectors, method).await {
                Ok(scores) => scores,
                Err(err) => {
                    warn!(?err, scholar = %author.display_name, "scoring failed, assigning zero row");
                    vec![0.0; courses.len()]
                }
            };

            table.rows.push(ScoreRow {
                display_name: author.display_name,
                sort_key: author.sort_key,
                scores,
            });
        }

        table.sort_rows();

        tokio_fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

        let run_id = short_run_id();
        let base_name = format!("{OUTPUT_PREFIX}_{}_{run_id}", method.as_str());
        let csv_name = format!("{base_name}.csv");
        let csv_path = output_dir.join(&csv_name);

        {
            let table = table.clone();
            let path = csv_path.clone();
            tokio::task::spawn_blocking(move || table.write_csv(&path))
                .await
                .unwrap_or_else(|err| Err(anyhow!(err)))?;
        }
        info!(path = %csv_path.display(), "score table saved");

        let rendered = {
            let table = table.clone();
            let dir = output_dir.to_path_buf();
            let base = base_name.clone();
            tokio::task::spawn_blocking(move || visualize::render_heatmap(&table, &dir, &base))
                .await
                .unwrap_or_else(|err| Err(anyhow!(err)))
        };

        let files = match rendered {
            Ok((png, pdf)) => ResultFileGroup {
                csv: Some(csv_name),
                png: Some(png),
                pdf: Some(pdf),
            },
            Err(err) => {
                warn!(?err, "heatmap rendering failed, reporting the score table only");
                ResultFileGroup {
                    csv: Some(csv_name),
                    png: None,
                    pdf: None,
                }
            }
        };

        Ok((table, files))
    }

    async fn score_author(
        &self,
        author: &AuthorRecord,
        course_vectors: &[Vec<f32>],
        method: Method,
    ) -> Result<Vec<f32>> {
        // Scholars without usable publications never touch the embedder.
        if author.publication_texts.is_empty() {
            return Ok(vec![0.0; course_vectors.len()]);
        }

        let mut accumulator = ScoreAccumulator::new(method, course_vectors.len());
        for batch in author.publication_texts.chunks(PUBLICATION_BATCH_SIZE) {
            let pub_vectors = self
                .embedder
                .embed(batch)
                .await
                .with_context(|| format!("failed to embed publications of {}", author.display_name))?;
            accumulator.fold_batch(&pub_vectors, course_vectors);
        }
        Ok(accumulator.finish())
    }
}

pub fn heatmap_png_name(base_name: &str) -> String {
    format!("{base_name}{HEATMAP_SUFFIX}.png")
}

pub fn heatmap_pdf_name(base_name: &str) -> String {
    format!("{base_name}{HEATMAP_SUFFIX}.pdf")
}

fn short_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![0.2, 0.7, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    fn sample_matrices() -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let pubs = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![0.5, 0.0],
        ];
        let courses = vec![vec![1.0, 0.0], vec![0.0, 2.0]];
        (pubs, courses)
    }

    #[test]
    fn aggregate_sum_and_max_and_mean() {
        let (pubs, courses) = sample_matrices();

        let sum = aggregate(&pubs, &courses, Method::Sum);
        let max = aggregate(&pubs, &courses, Method::Max);
        let mean = aggregate(&pubs, &courses, Method::Mean);

        let inv_sqrt2 = 1.0 / 2.0f32.sqrt();
        assert!((sum[0] - (1.0 + 0.0 + inv_sqrt2 + 1.0)).abs() < 1e-5);
        assert!((sum[1] - (0.0 + 1.0 + inv_sqrt2 + 0.0)).abs() < 1e-5);
        assert!((max[0] - 1.0).abs() < 1e-6);
        assert!((max[1] - 1.0).abs() < 1e-6);
        assert!((mean[0] - sum[0] / 4.0).abs() < 1e-5);
        assert!((mean[1] - sum[1] / 4.0).abs() < 1e-5);
    }

    #[test]
    fn sum_and_max_compose_across_any_partitioning() {
        let (pubs, courses) = sample_matrices();

        for method in [Method::Sum, Method::Max] {
            let whole = aggregate(&pubs, &courses, method);
            for split in 1..pubs.len() {
                let mut accumulator = ScoreAccumulator::new(method, courses.len());
                accumulator.fold_batch(&pubs[..split], &courses);
                accumulator.fold_batch(&pubs[split..], &courses);
                let batched = accumulator.finish();
                for (a, b) in whole.iter().zip(batched.iter()) {
                    assert!((a - b).abs() < 1e-5, "{method} diverged at split {split}");
                }
            }
        }
    }

    #[test]
    fn mean_is_weighted_across_unequal_batches() {
        let (pubs, courses) = sample_matrices();
        let whole = aggregate(&pubs, &courses, Method::Mean);

        // 1 + 3 publications; naive per-batch averaging would bias this.
        let mut accumulator = ScoreAccumulator::new(Method::Mean, courses.len());
        accumulator.fold_batch(&pubs[..1], &courses);
        accumulator.fold_batch(&pubs[1..], &courses);
        let batched = accumulator.finish();

        for (a, b) in whole.iter().zip(batched.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn empty_accumulator_yields_zeros() {
        let accumulator = ScoreAccumulator::new(Method::Max, 3);
        assert_eq!(accumulator.finish(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn method_parsing_rejects_unknown_values() {
        assert_eq!("sum".parse::<Method>().unwrap(), Method::Sum);
        assert_eq!("mean".parse::<Method>().unwrap(), Method::Mean);
        assert_eq!("max".parse::<Method>().unwrap(), Method::Max);
        assert!("median".parse::<Method>().is_err());
        assert!("SUM".parse::<Method>().is_err());
    }

    #[test]
    fn score_table_csv_has_course_columns_and_sorted_rows() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("scores.csv");
        let table = ScoreTable {
            courses: vec!["Deep Learning".to_string(), "Databases".to_string()],
            rows: vec![ScoreRow {
                display_name: "Jane Doe".to_string(),
                sort_key: "Doe".to_string(),
                scores: vec![0.5, 1.25],
            }],
        };

        table.write_csv(&path).expect("write csv");
        let contents = std::fs::read_to_string(&path).expect("read csv");
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), ",Deep Learning,Databases");
        assert_eq!(lines.next().unwrap(), "Jane Doe,0.5,1.25");
    }

    pub(crate) struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        fail_on: Option<String>,
    }

    impl StubEmbedder {
        pub(crate) fn new(vectors: HashMap<String, Vec<f32>>) -> Self {
            Self {
                vectors,
                fail_on: None,
            }
        }

        pub(crate) fn failing_on(mut self, text: impl Into<String>) -> Self {
            self.fail_on = Some(text.into());
            self
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if let Some(fail_on) = &self.fail_on {
                if texts.iter().any(|text| text == fail_on) {
                    bail!("stub embedder refused '{fail_on}'");
                }
            }
            Ok(texts
                .iter()
                .map(|text| {
                    self.vectors
                        .get(text)
                        .cloned()
                        .unwrap_or_else(|| vec![1.0, 1.0])
                })
                .collect())
        }
    }

    pub(crate) struct StubScholarSource {
        outcomes: HashMap<String, FetchOutcome>,
    }

    impl StubScholarSource {
        pub(crate) fn new(outcomes: HashMap<String, FetchOutcome>) -> Self {
            Self { outcomes }
        }
    }

    #[async_trait]
    impl ScholarSource for StubScholarSource {
        async fn fetch(&self, scholar_id: &str) -> FetchOutcome {
            self.outcomes
                .get(scholar_id)
                .cloned()
                .unwrap_or_else(|| FetchOutcome::Failed {
                    scholar_id: scholar_id.to_string(),
                    cause: "unknown scholar".to_string(),
                })
        }
    }

    fn pipeline_fixture() -> AnalysisPipeline {
        let mut vectors = HashMap::new();
        vectors.insert("Machine Learning".to_string(), vec![1.0, 0.0]);
        vectors.insert("Operating Systems".to_string(), vec![0.0, 1.0]);
        vectors.insert(
            "A study of gradient descent".to_string(),
            vec![1.0, 0.0],
        );
        vectors.insert(
            "Scheduling in modern kernels".to_string(),
            vec![0.0, 1.0],
        );

        let mut outcomes = HashMap::new();
        outcomes.insert(
            "A".to_string(),
            FetchOutcome::Failed {
                scholar_id: "A".to_string(),
                cause: "network unreachable".to_string(),
            },
        );
        outcomes.insert(
            "B".to_string(),
            FetchOutcome::Author {
                name: "Jane B. Doe - Prof".to_string(),
                publication_titles: vec![
                    "A study of gradient descent".to_string(),
                    "Scheduling in modern kernels".to_string(),
                ],
            },
        );
        outcomes.insert(
            "C".to_string(),
            FetchOutcome::Author {
                name: "Alan Aardvark".to_string(),
                publication_titles: Vec::new(),
            },
        );

        AnalysisPipeline::new(
            Arc::new(StubEmbedder::new(vectors)),
            Arc::new(StubScholarSource::new(outcomes)),
        )
    }

    fn courses() -> Vec<String> {
        vec![
            "Machine Learning".to_string(),
            "Operating Systems".to_string(),
        ]
    }

    #[tokio::test]
    async fn pipeline_skips_failed_scholars_and_keeps_column_order() {
        let dir = tempdir().expect("temp dir");
        let pipeline = pipeline_fixture();

        let (table, files) = pipeline
            .run(
                &courses(),
                &["A".to_string(), "B".to_string()],
                Method::Sum,
                dir.path(),
                None,
            )
            .await
            .expect("pipeline run");

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].display_name, "Jane B. Doe");
        assert_eq!(table.rows[0].scores.len(), 2);
        assert!((table.rows[0].scores[0] - 1.0).abs() < 1e-5);
        assert!((table.rows[0].scores[1] - 1.0).abs() < 1e-5);

        let csv = files.csv.expect("csv name");
        assert!(dir.path().join(&csv).exists());
        assert!(csv.contains("_sum_"));
    }

    #[tokio::test]
    async fn scholars_without_publications_get_zero_rows() {
        let dir = tempdir().expect("temp dir");
        let pipeline = pipeline_fixture();

        let (table, _) = pipeline
            .run(&courses(), &["C".to_string()], Method::Max, dir.path(), None)
            .await
            .expect("pipeline run");

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].scores, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn rows_are_sorted_by_last_name() {
        let dir = tempdir().expect("temp dir");
        let pipeline = pipeline_fixture();

        let (table, _) = pipeline
            .run(
                &courses(),
                &["B".to_string(), "C".to_string()],
                Method::Sum,
                dir.path(),
                None,
            )
            .await
            .expect("pipeline run");

        let keys: Vec<&str> = table.rows.iter().map(|row| row.sort_key.as_str()).collect();
        assert_eq!(keys, vec!["Aardvark", "Doe"]);
    }

    #[tokio::test]
    async fn course_embedding_failure_is_fatal_and_writes_nothing() {
        let dir = tempdir().expect("temp dir");
        let embedder =
            StubEmbedder::new(HashMap::new()).failing_on("Machine Learning");
        let pipeline = AnalysisPipeline::new(
            Arc::new(embedder),
            Arc::new(StubScholarSource::new(HashMap::new())),
        );

        let result = pipeline
            .run(&courses(), &["B".to_string()], Method::Sum, dir.path(), None)
            .await;

        assert!(result.is_err());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .map(|entries| entries.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn per_author_embedding_failure_degrades_to_zero_row() {
        let dir = tempdir().expect("temp dir");
        let mut vectors = HashMap::new();
        vectors.insert("Machine Learning".to_string(), vec![1.0, 0.0]);
        vectors.insert("Operating Systems".to_string(), vec![0.0, 1.0]);
        let embedder = StubEmbedder::new(vectors).failing_on("A study of gradient descent");

        let mut outcomes = HashMap::new();
        outcomes.insert(
            "B".to_string(),
            FetchOutcome::Author {
                name: "Jane B. Doe".to_string(),
                publication_titles: vec!["A study of gradient descent".to_string()],
            },
        );

        let pipeline = AnalysisPipeline::new(
            Arc::new(embedder),
            Arc::new(StubScholarSource::new(outcomes)),
        );

        let (table, _) = pipeline
            .run(&courses(), &["B".to_string()], Method::Sum, dir.path(), None)
            .await
            .expect("pipeline run");

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].scores, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn heatmap_failure_degrades_to_csv_only() {
        let dir = tempdir().expect("temp dir");
        let pipeline = pipeline_fixture();

        // Every scholar fails, so the table has no rows and the heatmap
        // renderer rejects it; the run must still succeed with the CSV.
        let (table, files) = pipeline
            .run(&courses(), &["A".to_string()], Method::Sum, dir.path(), None)
            .await
            .expect("pipeline run");

        assert!(table.rows.is_empty());
        let csv = files.csv.expect("csv name");
        assert!(dir.path().join(&csv).exists());
        assert_eq!(files.png, None);
        assert_eq!(files.pdf, None);
    }

    #[tokio::test]
    async fn progress_events_follow_input_order() {
        let dir = tempdir().expect("temp dir");
        let pipeline = pipeline_fixture();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        pipeline
            .run(
                &courses(),
                &["A".to_string(), "B".to_string(), "C".to_string()],
                Method::Sum,
                dir.path(),
                Some(tx),
            )
            .await
            .expect("pipeline run");

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push((event.index, event.scholar_id));
        }
        assert_eq!(
            seen,
            vec![
                (0, "A".to_string()),
                (1, "B".to_string()),
                (2, "C".to_string())
            ]
        );
    }
}
