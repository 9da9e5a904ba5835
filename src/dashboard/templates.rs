use crate::job::{Job, JobStatus, QueueStats};

fn layout(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - Receipt Spooler</title>
    <style>
        body {{ font-family: system-ui, sans-serif; background: #fafaf9; color: #292524; margin: 0; }}
        main {{ max-width: 1100px; margin: 0 auto; padding: 16px; }}
        header {{ background: #44403c; color: #fafaf9; padding: 14px 16px; }}
        nav a {{ color: #b45309; margin-right: 18px; text-decoration: none; }}
        .stats {{ display: flex; gap: 16px; margin: 20px 0; }}
        .stat {{ flex: 1; background: white; border: 1px solid #e7e5e4; border-radius: 6px; padding: 16px; text-align: center; }}
        .stat strong {{ display: block; font-size: 1.8rem; }}
        table {{ width: 100%; border-collapse: collapse; background: white; }}
        th, td {{ padding: 8px 12px; border-bottom: 1px solid #e7e5e4; text-align: left; }}
        .status {{ padding: 2px 10px; border-radius: 10px; font-size: 0.8rem; }}
        .status-pending {{ background: #fef3c7; }}
        .status-completed {{ background: #dcfce7; }}
        .status-failed {{ background: #fee2e2; }}
        .error {{ color: #b91c1c; font-size: 0.85rem; }}
        .empty {{ text-align: center; color: #78716c; padding: 32px; }}
    </style>
</head>
<body>
    <header><strong>Receipt Spooler</strong></header>
    <main>
        <nav>
            <a href="/dashboard">Overview</a>
            <a href="/dashboard/jobs/pending">Pending</a>
            <a href="/dashboard/jobs/completed">Completed</a>
            <a href="/dashboard/jobs/failed">Failed</a>
        </nav>
        {content}
    </main>
</body>
</html>"#
    )
}

pub fn render_overview(stats: &QueueStats) -> String {
    let content = format!(
        r#"<div class="stats">
            <div class="stat"><strong>{}</strong>Pending</div>
            <div class="stat"><strong>{}</strong>Completed</div>
            <div class="stat"><strong>{}</strong>Failed</div>
        </div>"#,
        stats.pending, stats.completed, stats.failed
    );
    layout("Overview", &content)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn job_row(job: &Job) -> String {
    let error = job
        .last_error
        .as_deref()
        .map(|e| format!(r#"<br><span class="error">{}</span>"#, html_escape(e)))
        .unwrap_or_default();
    let last_attempt = job
        .last_attempt_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let actions = if job.status == JobStatus::Failed {
        format!(
            r#"<form method="post" action="/dashboard/jobs/{}/replay"><button>Replay</button></form>"#,
            job.id
        )
    } else {
        String::new()
    };

    format!(
        r#"<tr><td>{}</td><td>{}</td><td><span class="status status-{status}">{status}</span>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>"#,
        job.id,
        html_escape(&job.reference()),
        error,
        job.attempts,
        job.created_at.format("%Y-%m-%d %H:%M:%S"),
        last_attempt,
        actions,
        status = job.status,
    )
}

pub fn render_jobs(status: JobStatus, jobs: &[Job]) -> String {
    let rows = if jobs.is_empty() {
        r#"<tr><td colspan="7" class="empty">No jobs</td></tr>"#.to_string()
    } else {
        jobs.iter().map(job_row).collect::<Vec<_>>().join("\n")
    };

    let content = format!(
        r#"<h2>{status} jobs</h2>
        <table><thead><tr><th>Job</th><th>Purchase</th><th>Status</th><th>Attempts</th><th>Created</th><th>Last attempt</th><th></th></tr></thead>
        <tbody>{rows}</tbody></table>"#
    );
    layout(status.as_str(), &content)
}
