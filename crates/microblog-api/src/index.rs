pub async fn index() -> &'static str {
    "hello world!"
}
