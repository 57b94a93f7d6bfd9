use std::borrow::Cow;

use chrono::{Datelike, Utc};

const PAGE_BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; }
        header { background: #ffffff; padding: 2rem 1.5rem; border-bottom: 1px solid #e2e8f0; }
        .header-bar { display: flex; justify-content: space-between; align-items: center; flex-wrap: wrap; gap: 1rem; }
        .back-link { display: inline-flex; align-items: center; gap: 0.4rem; color: #1d4ed8; text-decoration: none; font-weight: 600; background: #e0f2fe; padding: 0.5rem 0.95rem; border-radius: 999px; border: 1px solid #bfdbfe; }
        .back-link:hover { background: #bfdbfe; border-color: #93c5fd; }
        main { padding: 2rem 1.5rem; max-width: 960px; margin: 0 auto; box-sizing: border-box; }
        section { margin-bottom: 2.5rem; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); }
        .panel h2 { margin-top: 0; }
        label { display: block; margin-bottom: 0.5rem; font-weight: 600; color: #0f172a; }
        textarea, select { width: 100%; padding: 0.75rem; border-radius: 8px; border: 1px solid #cbd5f5; background: #f8fafc; color: #0f172a; box-sizing: border-box; font-family: inherit; }
        textarea { min-height: 10rem; resize: vertical; }
        textarea:focus, select:focus { outline: none; border-color: #2563eb; box-shadow: 0 0 0 3px rgba(37, 99, 235, 0.12); }
        button { padding: 0.85rem 1.2rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; cursor: pointer; }
        button:hover { background: #1d4ed8; }
        button:disabled { opacity: 0.6; cursor: not-allowed; }
        .status-box { margin-top: 1rem; padding: 1rem; border-radius: 12px; background: #f1f5f9; color: #0f172a; min-height: 3rem; }
        .status-box.error { color: #b91c1c; }
        .status-box.success { color: #166534; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .downloads a { color: #2563eb; text-decoration: none; margin-right: 1rem; font-weight: 600; }
        .downloads a:hover { text-decoration: underline; }
        .progress-track { margin-top: 1rem; height: 0.75rem; border-radius: 999px; background: #e2e8f0; overflow: hidden; }
        .progress-fill { height: 100%; background: #2563eb; width: 0%; transition: width 0.3s ease; }
        .heatmap-frame { margin-top: 1.5rem; text-align: center; }
        .heatmap-frame img { max-width: 100%; border: 1px solid #e2e8f0; border-radius: 12px; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
        @media (max-width: 768px) {
            header { padding: 1.5rem 1rem; }
            main { padding: 1.5rem 1rem; }
            .header-bar { flex-direction: column; align-items: flex-start; }
        }
"#;

pub struct PageLayout<'a> {
    pub meta_title: &'a str,
    pub page_heading: &'a str,
    pub note_html: Cow<'a, str>,
    pub body_html: Cow<'a, str>,
    pub back_link: Option<&'a str>,
    pub body_scripts: Vec<Cow<'a, str>>,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        meta_title,
        page_heading,
        note_html,
        body_html,
        back_link,
        body_scripts,
    } = layout;

    let back_link_html = back_link
        .map(|href| format!(r#"<a class="back-link" href="{href}">← Back</a>"#))
        .unwrap_or_default();

    let scripts = body_scripts
        .into_iter()
        .map(|script| script.into_owned())
        .collect::<Vec<_>>()
        .join("\n");

    let footer = render_footer();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{meta_title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
{PAGE_BASE_STYLES}
    </style>
</head>
<body>
    <header>
        <div class="header-bar">
            <h1>{page_heading}</h1>
            {back_link_html}
        </div>
        <p class="note">{note_html}</p>
    </header>
    <main>
{body_html}
        {footer}
    </main>
{scripts}
</body>
</html>"#,
    )
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(r#"<footer class="app-footer">© {current_year} Course Expertise Explorer</footer>"#)
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_sensitive_characters() {
        assert_eq!(
            escape_html(r#"<b>"A" & 'B'</b>"#),
            "&lt;b&gt;&quot;A&quot; &amp; &#39;B&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn page_shell_embeds_heading_and_scripts() {
        let html = render_page(PageLayout {
            meta_title: "Title",
            page_heading: "Heading",
            note_html: Cow::Borrowed("a note"),
            body_html: Cow::Borrowed("<p>body</p>"),
            back_link: Some("/"),
            body_scripts: vec![Cow::Borrowed("<script>1;</script>")],
        });

        assert!(html.contains("<h1>Heading</h1>"));
        assert!(html.contains("<p>body</p>"));
        assert!(html.contains("<script>1;</script>"));
        assert!(html.contains(r#"href="/""#));
    }
}
