mod utils;

#[tokio::test]
async fn test_health_check_works() {
    let app = utils::spawn_server().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    assert_eq!(Some(0), response.content_length());
}
