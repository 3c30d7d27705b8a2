use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde_json::json;

use parlor_auth::{AuthError, EndpointClass};

use crate::auth::AppState;
use crate::error::status_for;
use crate::middleware::{ClientAddr, MaybeSession};

const STYLE: &str = "body{font-family:sans-serif;max-width:40rem;margin:2rem auto;padding:0 1rem}\
#log{border:1px solid #ccc;height:20rem;overflow-y:auto;padding:.5rem}\
.status{color:#666;font-style:italic}";

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title} - Parlor</title>\
<style>{STYLE}</style></head><body><h1>{title}</h1>{body}</body></html>"
    ))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const LOGIN_BODY: &str = r#"<form id="login"><input type="email" name="email" placeholder="you@example.com" required>
<button type="submit">Send login link</button></form><p id="result"></p>
<script>
document.getElementById('login').addEventListener('submit', async (e) => {
  e.preventDefault();
  const res = await fetch('/login', {method: 'POST', body: new URLSearchParams(new FormData(e.target))});
  const data = await res.json();
  document.getElementById('result').textContent = data.message;
});
</script>"#;

pub async fn index() -> Html<String> {
    layout("Log in", LOGIN_BODY)
}

pub fn set_handle_page(current: Option<&str>) -> Html<String> {
    let current = current
        .map(|h| format!("<p>Your handle is <b>{}</b>.</p>", escape(h)))
        .unwrap_or_default();
    let body = format!(
        r#"{current}<form id="handle"><input name="handle" minlength="3" maxlength="32" required>
<button type="submit">Save</button></form><p id="result"></p>
<script>
document.getElementById('handle').addEventListener('submit', async (e) => {{
  e.preventDefault();
  const res = await fetch('/set_handle', {{method: 'POST', body: new URLSearchParams(new FormData(e.target))}});
  const data = await res.json();
  if (data.success) {{ window.location = '/chat'; }} else {{ document.getElementById('result').textContent = data.message; }}
}});
</script>"#
    );
    layout("Choose a handle", &body)
}

fn chat_page(handle: &str) -> Html<String> {
    let body = format!(
        r#"<p>Signed in as <b>{handle}</b>. <a href="/logout">Log out</a></p>
<div id="log"></div>
<form id="send"><input id="text" autocomplete="off" maxlength="2000"><button type="submit">Send</button></form>
<script>
const room = 'general';
const log = document.getElementById('log');
function show(text, cls) {{
  const p = document.createElement('p');
  p.textContent = text;
  if (cls) p.className = cls;
  log.appendChild(p);
  log.scrollTop = log.scrollHeight;
}}
const proto = location.protocol === 'https:' ? 'wss:' : 'ws:';
const ws = new WebSocket(proto + '//' + location.host + '/gateway');
ws.onopen = () => ws.send(JSON.stringify({{type: 'join', data: {{room}}}}));
ws.onmessage = (e) => {{
  const ev = JSON.parse(e.data);
  if (ev.type === 'status') show(ev.data.msg, 'status');
  else if (ev.type === 'message') show(ev.data.handle + ': ' + ev.data.text);
}};
ws.onclose = () => show('Disconnected.', 'status');
document.getElementById('send').addEventListener('submit', (e) => {{
  e.preventDefault();
  const input = document.getElementById('text');
  if (!input.value.trim()) return;
  ws.send(JSON.stringify({{type: 'chat_message', data: {{room, message: input.value}}}}));
  input.value = '';
}});
window.addEventListener('beforeunload', () => ws.send(JSON.stringify({{type: 'leave', data: {{room}}}})));
</script>"#,
        handle = escape(handle)
    );
    layout("Chat", &body)
}

/// HTML error page carrying one of the fixed client messages.
pub fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<p>{}</p><p><a href=\"/\">Back to login</a></p>",
        escape(message)
    );
    (status, layout("Something went wrong", &body)).into_response()
}

/// Chat room page. Each missing precondition redirects to the step that fixes it.
pub async fn chat(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    MaybeSession(session): MaybeSession,
) -> Response {
    if !state.rate_guard.allow(&client, EndpointClass::Chat) {
        let err = AuthError::RateLimited;
        return error_page(status_for(&err), &err.client_message());
    }

    match state.sessions.require_room_access(session.as_ref()).await {
        Ok(account) => chat_page(account.handle.as_deref().unwrap_or_default()).into_response(),
        Err(AuthError::NotAuthenticated | AuthError::NotVerified) => Redirect::to("/").into_response(),
        Err(AuthError::NoHandle) => Redirect::to("/set_handle").into_response(),
        Err(e) => error_page(status_for(&e), &e.client_message()),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_escape_user_text() {
        let Html(page) = set_handle_page(Some("<b>"));
        assert!(page.contains("&lt;b&gt;"));
        assert!(!page.contains("<b><b>"));
    }

    #[tokio::test]
    async fn index_has_login_form() {
        let Html(page) = index().await;
        assert!(page.contains(r#"name="email""#));
        assert!(page.contains("/login"));
    }
}
