use ogate_limits::HealthSnapshot;

/// Renders the `/vhealth` page. The dashboard proper is an external
/// collaborator; the built-in renderer is a plain table so the endpoint
/// works out of the box.
pub trait HealthRenderer: Send + Sync {
    fn render(&self, snapshot: &HealthSnapshot) -> String;
}

#[derive(Debug, Default)]
pub struct BasicHealthRenderer;

impl HealthRenderer for BasicHealthRenderer {
    fn render(&self, snapshot: &HealthSnapshot) -> String {
        let mut out = String::from(
            "<!doctype html><html><head><title>ogate health</title></head><body><h1>Credentials</h1><table border=\"1\"><tr><th>name</th><th>kind</th><th>available</th><th>rpm</th><th>tpm</th></tr>",
        );
        for cred in &snapshot.credentials {
            out.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{} / {}</td><td>{} / {}</td></tr>",
                escape(&cred.name),
                escape(&cred.kind),
                cred.available,
                cred.rpm_used,
                limit(cred.rpm_limit),
                cred.tpm_used,
                limit(cred.tpm_limit),
            ));
            for model in &cred.models {
                out.push_str(&format!(
                    "<tr><td colspan=\"2\">&nbsp;&nbsp;{}</td><td>{}</td><td>{} / {}</td><td>{} / {}</td></tr>",
                    escape(&model.model),
                    if model.banned { "banned" } else { "ok" },
                    model.rpm_used,
                    limit(model.rpm_limit),
                    model.tpm_used,
                    limit(model.tpm_limit),
                ));
            }
        }
        out.push_str("</table></body></html>");
        out
    }
}

fn limit(value: i64) -> String {
    if value < 0 {
        "∞".to_string()
    } else {
        value.to_string()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
