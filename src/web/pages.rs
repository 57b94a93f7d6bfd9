use std::borrow::Cow;

use axum::{
    Json,
    extract::{Path as AxumPath, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum::Form;
use serde::Deserialize;
use tokio::fs as tokio_fs;
use tracing::{error, warn};

use crate::{
    analysis::Method,
    config::AnalysisConfig,
    jobs::{self, JobStatus, LaunchError},
    web::{
        AppState, JobSubmission, escape_html, json_error,
        templates::{PageLayout, render_page},
    },
};

const STATUS_URL: &str = "/api/analysis/status";

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    saved: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigForm {
    courses: String,
    scholar_ids: String,
}

#[derive(Debug, Deserialize)]
pub struct LaunchForm {
    method: Method,
}

pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Html<String> {
    let config = match state.config_store().load().await {
        Ok(config) => config,
        Err(err) => {
            error!(?err, "failed to load analysis config, showing defaults");
            AnalysisConfig::default()
        }
    };

    let banner = if query.saved.is_some() {
        r#"<div class="status-box success">Configuration saved.</div>"#.to_string()
    } else if let Some(reason) = query.error {
        format!(
            r#"<div class="status-box error">{}</div>"#,
            escape_html(&reason)
        )
    } else {
        String::new()
    };

    let courses = escape_html(&config.courses.join("\n"));
    let scholar_ids = escape_html(&config.scholar_ids.join("\n"));

    let body_html = format!(
        r#"        {banner}
        <section class="panel">
            <h2>Courses and scholars</h2>
            <form method="post" action="/config">
                <label for="courses">Course topics (one per line)</label>
                <textarea id="courses" name="courses">{courses}</textarea>
                <label for="scholar_ids" style="margin-top:1rem;">Scholar profile ids (one per line)</label>
                <textarea id="scholar_ids" name="scholar_ids">{scholar_ids}</textarea>
                <button type="submit" style="margin-top:1rem;">Save configuration</button>
            </form>
        </section>
        <section class="panel">
            <h2>Run analysis</h2>
            <form id="analysis-form">
                <label for="method">Aggregation method</label>
                <select id="method" name="method">
                    <option value="sum">sum</option>
                    <option value="mean">mean</option>
                    <option value="max">max</option>
                </select>
                <button type="submit" id="launch-button" style="margin-top:1rem;">Start analysis</button>
            </form>
            <div id="analysis-status" class="status-box">No analysis has been started yet.</div>
            <div class="progress-track"><div id="progress-fill" class="progress-fill"></div></div>
            <div id="result-links" class="downloads" style="margin-top:1rem;"></div>
        </section>
        <section class="panel">
            <h2>Previous results</h2>
            <p class="note">The most recent completed run is kept on the <a href="/results">results page</a>.</p>
        </section>
"#
    );

    let script = format!(
        r#"<script>
const form = document.getElementById('analysis-form');
const statusBox = document.getElementById('analysis-status');
const progressFill = document.getElementById('progress-fill');
const resultLinks = document.getElementById('result-links');
const launchButton = document.getElementById('launch-button');
let statusTimer = null;

function describe(status) {{
    switch (status.state) {{
        case 'not_started':
            return 'No analysis has been started yet.';
        case 'started':
            return 'Analysis accepted, preparing…';
        case 'running': {{
            const current = status.current_scholar_id
                ? ` (scholar ${{status.current_scholar_id}})` : '';
            return `Running: ${{status.completed_scholars}} of ${{status.total_scholars}} scholars${{current}}`;
        }}
        case 'completed':
            return 'Analysis completed.';
        case 'failed':
            return `Analysis failed: ${{status.error || 'unknown error'}}`;
        default:
            return `Unknown state: ${{status.state}}`;
    }}
}}

function renderLinks(paths) {{
    resultLinks.innerHTML = '';
    if (!paths) return;
    for (const [kind, name] of Object.entries(paths)) {{
        const link = document.createElement('a');
        link.href = `/results/${{encodeURIComponent(name)}}`;
        link.textContent = kind.toUpperCase();
        resultLinks.appendChild(link);
    }}
}}

async function refreshStatus() {{
    try {{
        const response = await fetch('{STATUS_URL}');
        if (!response.ok) return;
        const status = await response.json();
        statusBox.textContent = describe(status);
        statusBox.className = 'status-box'
            + (status.state === 'failed' ? ' error' : '')
            + (status.state === 'completed' ? ' success' : '');
        progressFill.style.width = `${{status.progress_percent || 0}}%`;
        if (status.state === 'completed' || status.state === 'failed') {{
            clearInterval(statusTimer);
            statusTimer = null;
            launchButton.disabled = false;
            renderLinks(status.result_paths);
        }}
    }} catch (err) {{
        console.error('status poll failed', err);
    }}
}}

form.addEventListener('submit', async (event) => {{
    event.preventDefault();
    launchButton.disabled = true;
    resultLinks.innerHTML = '';
    progressFill.style.width = '0%';
    statusBox.className = 'status-box';
    statusBox.textContent = 'Submitting…';
    try {{
        const body = new URLSearchParams(new FormData(form));
        const response = await fetch('/api/analysis/jobs', {{ method: 'POST', body }});
        const payload = await response.json();
        if (response.status === 202) {{
            statusBox.textContent = 'Analysis accepted.';
            if (statusTimer) clearInterval(statusTimer);
            statusTimer = setInterval(refreshStatus, 2000);
            refreshStatus();
        }} else {{
            statusBox.className = 'status-box error';
            statusBox.textContent = payload.message || 'The analysis could not be started.';
            launchButton.disabled = false;
        }}
    }} catch (err) {{
        statusBox.className = 'status-box error';
        statusBox.textContent = 'Request failed, check the server log.';
        launchButton.disabled = false;
    }}
}});

refreshStatus();
</script>"#
    );

    Html(render_page(PageLayout {
        meta_title: "Course Expertise Explorer",
        page_heading: "Course Expertise Explorer",
        note_html: Cow::Borrowed(
            "Scores each scholar's publication record against the course list \
             using text embeddings, then renders the scores as a heatmap.",
        ),
        body_html: Cow::Owned(body_html),
        back_link: None,
        body_scripts: vec![Cow::Owned(script)],
    }))
}

pub async fn update_config(
    State(state): State<AppState>,
    Form(form): Form<ConfigForm>,
) -> Redirect {
    let courses = split_lines(&form.courses);
    let scholar_ids = split_lines(&form.scholar_ids);

    if courses.is_empty() {
        return Redirect::to("/?error=The+course+list+must+not+be+empty.");
    }
    if scholar_ids.is_empty() {
        return Redirect::to("/?error=The+scholar+id+list+must+not+be+empty.");
    }

    let config = AnalysisConfig {
        courses,
        scholar_ids,
    };
    match state.config_store().save(&config).await {
        Ok(()) => Redirect::to("/?saved=1"),
        Err(err) => {
            error!(?err, "failed to save analysis config");
            Redirect::to("/?error=The+configuration+could+not+be+saved.")
        }
    }
}

fn split_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn launch_job(
    State(state): State<AppState>,
    Form(form): Form<LaunchForm>,
) -> Response {
    let config = match state.config_store().load().await {
        Ok(config) => config,
        Err(err) => {
            error!(?err, "failed to load analysis config for launch");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The configuration could not be loaded.",
            )
            .into_response();
        }
    };

    match state
        .runner()
        .launch(config.courses, config.scholar_ids, form.method)
        .await
    {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(JobSubmission::new(STATUS_URL)),
        )
            .into_response(),
        Err(err) => {
            let status = match err {
                LaunchError::EmptyCourses | LaunchError::EmptyScholars => {
                    StatusCode::BAD_REQUEST
                }
                LaunchError::AlreadyRunning => StatusCode::CONFLICT,
                LaunchError::StatusUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            };
            json_error(status, err.message()).into_response()
        }
    }
}

pub async fn job_status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.runner().poll().await)
}

pub async fn results_page(State(state): State<AppState>) -> Html<String> {
    let body_html = match jobs::find_latest(state.results_dir()) {
        Ok(Some(latest)) => {
            let mut links = String::new();
            let png = latest.files.png.as_deref();
            for (label, name) in [
                ("CSV", latest.files.csv.as_deref()),
                ("PNG", png),
                ("PDF", latest.files.pdf.as_deref()),
            ] {
                if let Some(name) = name {
                    links.push_str(&format!(
                        r#"<a href="/results/{name}">{label}</a>"#,
                        name = escape_html(name),
                    ));
                }
            }
            let heatmap = png
                .map(|name| {
                    format!(
                        r#"<div class="heatmap-frame"><img src="/results/{name}" alt="Expertise heatmap"></div>"#,
                        name = escape_html(name),
                    )
                })
                .unwrap_or_default();
            format!(
                r#"        <section class="panel">
            <h2>Latest result ({method})</h2>
            <div class="downloads">{links}</div>
            {heatmap}
        </section>
"#,
                method = escape_html(&latest.method_label),
            )
        }
        Ok(None) => r#"        <section class="panel">
            <h2>No results yet</h2>
            <p class="note">Run an analysis from the home page; completed runs appear here.</p>
        </section>
"#
        .to_string(),
        Err(err) => {
            error!(?err, "failed to scan results directory");
            r#"        <section class="panel">
            <h2>Results unavailable</h2>
            <p class="note">The results directory could not be read; check the server log.</p>
        </section>
"#
            .to_string()
        }
    };

    Html(render_page(PageLayout {
        meta_title: "Results - Course Expertise Explorer",
        page_heading: "Analysis results",
        note_html: Cow::Borrowed("The most recent completed run, with downloadable artifacts."),
        body_html: Cow::Owned(body_html),
        back_link: Some("/"),
        body_scripts: Vec::new(),
    }))
}

pub async fn download_result(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> Response {
    // Served files are flat names produced by the pipeline; anything that
    // looks like a path is rejected outright.
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        warn!(%filename, "rejected result download with path separators");
        return json_error(StatusCode::BAD_REQUEST, "Invalid result file name.")
            .into_response();
    }

    let path = state.results_dir().join(&filename);
    let bytes = match tokio_fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return json_error(StatusCode::NOT_FOUND, "No such result file.").into_response();
        }
        Err(err) => {
            error!(?err, path = %path.display(), "failed to read result file");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The result file could not be read.",
            )
            .into_response();
        }
    };

    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        Some("csv") => "text/csv; charset=utf-8",
        _ => "application/octet-stream",
    };

    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_padded_lines_are_dropped() {
        let lines = split_lines("  Machine Learning \n\n Databases\n   \n");
        assert_eq!(lines, vec!["Machine Learning", "Databases"]);
        assert!(split_lines("\n  \n").is_empty());
    }
}
