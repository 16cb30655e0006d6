use hypermocker::{Bytes, Mock, StatusCode};

#[tokio::test]
async fn anticipated_request_is_answered() {
    let _ = env_logger::try_init();

    let mock = Mock::bind().await.unwrap();
    let url = mock.url("/foo");
    let mut request = mock.anticipate("/foo").await;

    futures::future::join(
        async {
            let response = reqwest::get(url).await.unwrap();
            let bytes = response.bytes().await.unwrap();
            assert_eq!(&bytes[..], b"hello");
        },
        async {
            let head = request.expect().await;
            assert_eq!(head.uri.path(), "/foo");
            request.respond(Bytes::from_static(b"hello")).await;
        },
    )
    .await;
}

#[tokio::test]
async fn respond_with_status() {
    let _ = env_logger::try_init();

    let mock = Mock::bind().await.unwrap();
    let url = mock.url("/missing");
    let request = mock.anticipate("/missing").await;

    futures::future::join(
        async {
            let response = reqwest::get(url).await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        },
        request.respond_with_status(StatusCode::NOT_FOUND),
    )
    .await;
}

#[tokio::test]
async fn unexpected_request() {
    let _ = env_logger::try_init();

    let mock = Mock::bind().await.unwrap();
    let url = mock.url("/foo");

    let response = reqwest::get(url).await.unwrap();
    let bytes = response.bytes().await.unwrap();
    assert_eq!(&bytes[..], b"unexpected");
    assert_eq!(mock.take_unexpected(), vec!["/foo".to_owned()]);
}
