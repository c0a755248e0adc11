//! End-to-end tests: the real router on an ephemeral port, driven over HTTP.
//!
//! Each test gets its own SQLite file and upload directory. The client keeps
//! cookies but does not follow redirects, so every flash+redirect is visible.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Parser;
use reqwest::{
    header::{CONTENT_RANGE, CONTENT_TYPE, COOKIE, LOCATION, RANGE, SET_COOKIE},
    multipart::{Form, Part},
    redirect::Policy,
    Client, Response, StatusCode,
};
use tempfile::TempDir;

use darktube::{config::Config, models::NewVideo, state::AppState};

struct TestApp {
    addr: SocketAddr,
    state: Arc<AppState>,
    dir: TempDir,
}

impl TestApp {
    async fn spawn() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database_url = format!("sqlite://{}", dir.path().join("darktube.db").display());
        let upload_dir = dir.path().join("uploads");

        let config = Config::parse_from([
            "darktube",
            "--database-url",
            &database_url,
            "--upload-dir",
            upload_dir.to_str().unwrap(),
            "--secret-key",
            "e2e-secret",
            "--pbkdf2-rounds",
            "1000",
        ]);
        let state = AppState::new(config).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = darktube::app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, dir }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn upload_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join("uploads").join(name)
    }

    async fn register(&self, client: &Client, username: &str, password: &str) -> Response {
        client
            .post(self.url("/register"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, client: &Client, username: &str, password: &str) -> Response {
        client
            .post(self.url("/login"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .unwrap()
    }

    async fn upload(&self, client: &Client, title: &str, file_name: &str, bytes: &[u8]) -> Response {
        let form = Form::new()
            .percent_encode_noop()
            .text("title", title.to_string())
            .text("description", "uploaded in a test")
            .part("video", Part::bytes(bytes.to_vec()).file_name(file_name.to_string()));

        client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn logged_in_client(&self, username: &str) -> Client {
        let client = client();
        self.register(&client, username, "password").await;
        let response = self.login(&client, username, "password").await;
        assert_redirect(&response, "/");
        client
    }

    async fn page(&self, client: &Client, path: &str) -> String {
        let response = client.get(self.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "GET {path}");
        response.text().await.unwrap()
    }

    async fn video_count(&self) -> usize {
        self.state.videos.list_videos(None).await.unwrap().len()
    }
}

fn client() -> Client {
    Client::builder()
        .cookie_store(true)
        .redirect(Policy::none())
        .build()
        .unwrap()
}

/// The `name=value` part of the response's session cookie.
fn session_cookie(response: &Response) -> String {
    let header = response
        .headers()
        .get(SET_COOKIE)
        .expect("response sets a cookie")
        .to_str()
        .unwrap();
    header.split(';').next().unwrap().to_string()
}

fn assert_redirect(response: &Response, to: &str) {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(LOCATION).unwrap(), to);
}

/// Byte offset of `needle` in `haystack`, panicking when absent.
fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("{needle:?} not found in page"))
}

#[tokio::test]
async fn registers_distinct_users_and_rejects_duplicates() {
    let app = TestApp::spawn().await;
    let client = client();

    assert_redirect(&app.register(&client, "alice", "pw1").await, "/login");
    assert_redirect(&app.register(&client, "  bob  ", "pw2").await, "/login");
    assert_redirect(&app.register(&client, "alice", "other").await, "/register");

    let users = app.state.users.list_users().await.unwrap();
    let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let page = app.page(&client, "/register").await;
    assert!(page.contains("A user with that name already exists"));

    // flashes are shown once
    let page = app.page(&client, "/register").await;
    assert!(!page.contains("already exists"));
}

#[tokio::test]
async fn blank_registration_is_rejected() {
    let app = TestApp::spawn().await;
    let client = client();

    assert_redirect(&app.register(&client, "   ", "pw").await, "/register");
    assert!(app.state.users.list_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn login_requires_the_right_password() {
    let app = TestApp::spawn().await;
    let client = client();
    app.register(&client, "alice", "correct horse").await;

    assert_redirect(&app.login(&client, "alice", "wrong").await, "/login");
    assert!(app.page(&client, "/login").await.contains("Invalid username or password"));

    assert_redirect(&app.login(&client, "nobody", "correct horse").await, "/login");

    assert_redirect(&app.login(&client, " alice ", "correct horse").await, "/");
    let home = app.page(&client, "/").await;
    assert!(home.contains("You have logged in successfully"));
    assert!(home.contains("Log out"));
}

#[tokio::test]
async fn anonymous_browsing_sets_no_cookie() {
    let app = TestApp::spawn().await;
    let response = client().get(app.url("/")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn upload_requires_login_and_changes_nothing() {
    let app = TestApp::spawn().await;
    let client = client();

    assert_redirect(&client.get(app.url("/upload")).send().await.unwrap(), "/login");

    let response = app.upload(&client, "Sneaky", "sneaky.mp4", b"data").await;
    assert_redirect(&response, "/login");
    assert_eq!(app.video_count().await, 0);
    assert!(!app.upload_path("sneaky.mp4").exists());

    assert!(app.page(&client, "/login").await.contains("Please log in to access this page."));
}

#[tokio::test]
async fn disallowed_extension_is_rejected() {
    let app = TestApp::spawn().await;
    let client = app.logged_in_client("alice").await;

    let response = app.upload(&client, "Notes", "notes.txt", b"plain text").await;
    assert_redirect(&response, "/upload");
    assert_eq!(app.video_count().await, 0);
    assert!(!app.upload_path("notes.txt").exists());

    assert!(app.page(&client, "/upload").await.contains("Unsupported file format"));

    // the streamed temporary file is gone too
    assert_eq!(std::fs::read_dir(app.upload_path("")).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_file_part_and_empty_filename_are_rejected() {
    let app = TestApp::spawn().await;
    let client = app.logged_in_client("alice").await;

    let form = Form::new().text("title", "No file");
    let response = client.post(app.url("/upload")).multipart(form).send().await.unwrap();
    assert_redirect(&response, "/upload");
    assert!(app.page(&client, "/upload").await.contains("No file part"));

    let response = app.upload(&client, "Empty", "", b"").await;
    assert_redirect(&response, "/upload");
    assert!(app.page(&client, "/upload").await.contains("No selected file"));

    assert_eq!(app.video_count().await, 0);
}

#[tokio::test]
async fn uploaded_file_round_trips() {
    let app = TestApp::spawn().await;
    let alice = app.logged_in_client("alice").await;
    let bytes: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    let response = app.upload(&alice, "My clip", "../My Clip.MP4", &bytes).await;
    assert_redirect(&response, "/");
    assert!(app.page(&alice, "/").await.contains("Video uploaded successfully"));

    let videos = app.state.videos.list_videos(None).await.unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].filename, "My_Clip.MP4");
    assert_eq!(videos[0].uploader, "alice");
    assert_eq!(videos[0].description.as_deref(), Some("uploaded in a test"));

    let response = client().get(app.url("/uploads/My_Clip.MP4")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(response.bytes().await.unwrap().as_ref(), bytes.as_slice());

    let response = client()
        .get(app.url("/uploads/My_Clip.MP4"))
        .header(RANGE, "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers().get(CONTENT_RANGE).unwrap(), "bytes 100-199/10000");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &bytes[100..200]);
}

#[tokio::test]
async fn same_filename_overwrites_the_stored_file() {
    let app = TestApp::spawn().await;
    let client = app.logged_in_client("alice").await;

    app.upload(&client, "First", "clip.mp4", b"first").await;
    app.upload(&client, "Second", "clip.mp4", b"second").await;

    assert_eq!(app.video_count().await, 2);
    let body = client.get(app.url("/uploads/clip.mp4")).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(body.as_ref(), b"second");
}

#[tokio::test]
async fn unknown_files_are_not_found() {
    let app = TestApp::spawn().await;
    std::fs::create_dir_all(app.upload_path("")).unwrap();
    std::fs::write(app.dir.path().join("secret.txt"), b"secret").unwrap();

    for path in ["/uploads/missing.mp4", "/uploads/..%2Fsecret.txt", "/uploads/..%2F..%2Fetc%2Fpasswd"] {
        let response = client().get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "GET {path}");
    }
}

async fn seed_videos(app: &TestApp, titles: &[&str]) -> Vec<i64> {
    let user_id = app.state.users.create_user("seeder", "unused").await.unwrap();
    let base = Utc::now() - Duration::hours(1);

    let mut ids = Vec::new();
    for (i, title) in titles.iter().enumerate() {
        let mut video = NewVideo::new(title.to_string(), None, format!("seed{i}.mp4"), user_id);
        video.upload_date = base + Duration::minutes(i as i64);
        ids.push(app.state.videos.add_video(&video).await.unwrap());
    }
    ids
}

#[tokio::test]
async fn listing_is_newest_first_and_search_filters_titles() {
    let app = TestApp::spawn().await;
    seed_videos(&app, &["Oldest upload", "Rust in production", "Newest upload"]).await;
    let client = client();

    let home = app.page(&client, "/").await;
    let newest = position(&home, "Newest upload");
    let middle = position(&home, "Rust in production");
    let oldest = position(&home, "Oldest upload");
    assert!(newest < middle && middle < oldest);

    let results = app.page(&client, "/?q=Rust").await;
    assert!(results.contains("Rust in production"));
    assert!(!results.contains("Oldest upload"));
    assert!(!results.contains("Newest upload"));

    let lowercase = app.page(&client, "/?q=rust").await;
    assert!(!lowercase.contains("Rust in production"));

    let none = app.page(&client, "/?q=zebra").await;
    assert!(none.contains("No videos found."));

    let empty_query = app.page(&client, "/?q=").await;
    assert!(empty_query.contains("Oldest upload"));
}

#[tokio::test]
async fn video_page_recommends_five_newest_others() {
    let app = TestApp::spawn().await;
    let titles = ["Video 0", "Video 1", "Video 2", "Video 3", "Video 4", "Video 5", "Video 6"];
    let ids = seed_videos(&app, &titles).await;
    let client = client();

    let page = app.page(&client, &format!("/video/{}", ids[6])).await;
    let recommended = &page[position(&page, "Recommended")..];

    assert!(!recommended.contains("Video 6"));
    assert!(!recommended.contains("Video 0"));
    let order: Vec<usize> = ["Video 5", "Video 4", "Video 3", "Video 2", "Video 1"]
        .iter()
        .map(|title| position(recommended, title))
        .collect();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));

    let page = app.page(&client, &format!("/video/{}", ids[3])).await;
    let recommended = &page[position(&page, "Recommended")..];
    assert!(!recommended.contains("Video 3"));
    assert!(recommended.contains("Video 6"));
    assert!(!recommended.contains("Video 0"));
}

#[tokio::test]
async fn missing_video_is_not_found() {
    let app = TestApp::spawn().await;

    for path in ["/video/9999", "/video/not-a-number"] {
        let response = client().get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "GET {path}");
    }
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::spawn().await;
    let client = app.logged_in_client("alice").await;

    assert_eq!(client.get(app.url("/upload")).send().await.unwrap().status(), StatusCode::OK);

    assert_redirect(&client.get(app.url("/logout")).send().await.unwrap(), "/");
    assert!(app.page(&client, "/").await.contains("You have been logged out"));

    assert_redirect(&client.get(app.url("/upload")).send().await.unwrap(), "/login");
    assert_redirect(&client.get(app.url("/logout")).send().await.unwrap(), "/login");
}

#[tokio::test]
async fn forged_session_cookie_is_ignored() {
    let app = TestApp::spawn().await;
    let response = client()
        .get(app.url("/upload"))
        .header("Cookie", "darktube_session=not-signed")
        .send()
        .await
        .unwrap();

    assert_redirect(&response, "/login");
}

#[tokio::test]
async fn login_issues_a_fresh_session_cookie() {
    let app = TestApp::spawn().await;
    app.register(&client(), "alice", "password").await;

    // an anonymous visit that stores a flash hands out a cookie
    let response = client().get(app.url("/upload")).send().await.unwrap();
    assert_redirect(&response, "/login");
    let before_login = session_cookie(&response);

    let response = client()
        .post(app.url("/login"))
        .header(COOKIE, &before_login)
        .form(&[("username", "alice"), ("password", "password")])
        .send()
        .await
        .unwrap();
    assert_redirect(&response, "/");
    let after_login = session_cookie(&response);
    assert_ne!(after_login, before_login);

    let stale = client()
        .get(app.url("/upload"))
        .header(COOKIE, &before_login)
        .send()
        .await
        .unwrap();
    assert_redirect(&stale, "/login");

    let fresh = client()
        .get(app.url("/"))
        .header(COOKIE, &after_login)
        .send()
        .await
        .unwrap();
    let home = fresh.text().await.unwrap();
    assert!(home.contains("Please log in to access this page."));
    assert!(home.contains("You have logged in successfully"));

    let upload = client()
        .get(app.url("/upload"))
        .header(COOKIE, &after_login)
        .send()
        .await
        .unwrap();
    assert_eq!(upload.status(), StatusCode::OK);
}
