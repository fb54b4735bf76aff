use axum::{
    Form,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use tracing::info;

use microblog_types::forms::{FieldError, LoginForm};

pub async fn login_form() -> Html<String> {
    Html(render(&[]))
}

/// Validates the submission and sends the browser back to the index.
/// No credentials are checked.
pub async fn login(Form(form): Form<LoginForm>) -> Response {
    if let Err(errors) = form.validate() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Html(render(&errors))).into_response();
    }

    info!(
        "Login requested for user {}, remember_me={}",
        form.username,
        form.remember_me()
    );
    Redirect::to("/index").into_response()
}

fn render(errors: &[FieldError]) -> String {
    let error_for = |field: &str| -> String {
        errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| format!("<span class=\"error\">[{}]</span>", e.message))
            .collect()
    };

    format!(
        r#"<!doctype html>
<html>
<head><title>Sign In - Microblog</title></head>
<body>
<h1>Sign In</h1>
<form action="/login" method="post" novalidate>
<p><label for="username">Username</label><br>
<input id="username" name="username" type="text" size="32"> {username_errors}</p>
<p><label for="password">Password</label><br>
<input id="password" name="password" type="password" size="32"> {password_errors}</p>
<p><input id="remember_me" name="remember_me" type="checkbox"> <label for="remember_me">Remember Me</label></p>
<p><input type="submit" value="Sign In"></p>
</form>
</body>
</html>
"#,
        username_errors = error_for("username"),
        password_errors = error_for("password"),
    )
}
