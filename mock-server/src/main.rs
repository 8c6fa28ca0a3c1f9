use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "8111".to_string());
    let addr = format!("127.0.0.1:{port}");
    let mut state = mock_server::MockState::new();
    if let Ok(token) = std::env::var("MOCK_TOKEN") {
        state = state.with_token(&token);
    }
    let listener = TcpListener::bind(&addr).await?;
    println!("listening on {addr}");
    mock_server::run_with_state(listener, mock_server::shared(state)).await
}
