//! HTML pages for the authorization flow.
//!
//! All interpolated values are HTML-escaped to prevent XSS. The hidden
//! fields carry the validated authorization parameters through the form
//! POST, where they are validated again before a code is issued.

use super::types::AuthorizationRequest;

/// Render the login page shown on `GET /authorize`.
pub fn render_login_page(req: &AuthorizationRequest, error_message: Option<&str>) -> String {
    let signup_href = format!("/signup?{}", authorize_query(req));
    render_page(
        req,
        error_message,
        "/authorize",
        "Sign in",
        &format!(
            r#"<p class="alt">No account? <a href="{}">Create one</a></p>"#,
            html_escape(&signup_href)
        ),
    )
}

/// Render the signup page shown on `GET /signup`.
pub fn render_signup_page(req: &AuthorizationRequest, error_message: Option<&str>) -> String {
    let login_href = format!("/authorize?{}", authorize_query(req));
    render_page(
        req,
        error_message,
        "/signup",
        "Create account",
        &format!(
            r#"<p class="alt">Already registered? <a href="{}">Sign in</a></p>"#,
            html_escape(&login_href)
        ),
    )
}

fn render_page(
    req: &AuthorizationRequest,
    error_message: Option<&str>,
    action: &str,
    submit_label: &str,
    footer: &str,
) -> String {
    let error_html = error_message
        .map(|msg| {
            format!(
                r#"<div style="background:#fee;border:1px solid #c00;color:#c00;padding:10px;border-radius:4px;margin-bottom:16px">{}</div>"#,
                html_escape(msg)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize - Toolgate MCP</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 24px; }}
label {{ display: block; font-size: 14px; font-weight: 500; margin: 12px 0 6px; color: #333; }}
input[type="text"], input[type="password"] {{ width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; }}
input:focus {{ outline: none; border-color: #4a90d9; box-shadow: 0 0 0 2px rgba(74,144,217,0.2); }}
button {{ width: 100%; padding: 10px; background: #4a90d9; color: #fff; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 16px; }}
button:hover {{ background: #357abd; }}
.alt {{ font-size: 13px; color: #666; margin: 16px 0 0; text-align: center; }}
.alt a {{ color: #4a90d9; }}
</style>
</head>
<body>
<div class="card">
<h1>Toolgate MCP</h1>
<p class="subtitle"><strong>{client_name}</strong> is requesting access to your tools</p>
{error_html}
<form method="POST" action="{action}">
{hidden_fields}
<label for="username">Username</label>
<input type="text" id="username" name="username" required autofocus>
<label for="password">Password</label>
<input type="password" id="password" name="password" required>
<button type="submit">{submit_label}</button>
</form>
{footer}
</div>
</body>
</html>"#,
        client_name = html_escape(&req.client_name),
        error_html = error_html,
        action = action,
        hidden_fields = hidden_fields(req),
        submit_label = submit_label,
        footer = footer,
    )
}

/// Standalone page for authorization requests that must be rejected
/// without redirecting (unknown client, unregistered redirect URI).
pub fn render_error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Error - Toolgate MCP</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #c00; }}
p {{ color: #666; font-size: 14px; margin: 0; }}
</style>
</head>
<body>
<div class="card">
<h1>Authorization request rejected</h1>
<p>{}</p>
</div>
</body>
</html>"#,
        html_escape(message)
    )
}

fn hidden_fields(req: &AuthorizationRequest) -> String {
    let mut fields = format!(
        r#"<input type="hidden" name="client_id" value="{client_id}">
<input type="hidden" name="redirect_uri" value="{redirect_uri}">
<input type="hidden" name="response_type" value="code">
<input type="hidden" name="code_challenge" value="{code_challenge}">
<input type="hidden" name="code_challenge_method" value="S256">
<input type="hidden" name="scope" value="{scope}">"#,
        client_id = html_escape(&req.client_id),
        redirect_uri = html_escape(&req.redirect_uri),
        code_challenge = html_escape(&req.code_challenge),
        scope = html_escape(&req.scope),
    );
    if let Some(ref state) = req.state {
        fields.push_str(&format!(
            "\n<input type=\"hidden\" name=\"state\" value=\"{}\">",
            html_escape(state)
        ));
    }
    fields
}

/// Serialize the authorization parameters back into a query string, for
/// the links between the login and signup pages.
#[must_use]
pub fn authorize_query(req: &AuthorizationRequest) -> String {
    let mut query = format!(
        "client_id={}&redirect_uri={}&response_type=code&code_challenge={}&code_challenge_method=S256&scope={}",
        url_encode(&req.client_id),
        url_encode(&req.redirect_uri),
        url_encode(&req.code_challenge),
        url_encode(&req.scope),
    );
    if let Some(ref state) = req.state {
        query.push_str(&format!("&state={}", url_encode(state)));
    }
    query
}

/// Percent-encode a string for use in URL query parameters.
pub(crate) fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    encoded
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
