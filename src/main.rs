use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;
use sqlx::sqlite::SqlitePoolOptions;

mod audio;
mod auth;
mod config;
mod error;
mod images;
mod media;
mod model;
mod notes;
mod pages;
mod storage;
mod users;
mod util;
mod validation;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = config::Config::from_env().expect("invalid configuration");

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await
        .expect("unable to open database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    let storage = storage::Storage::new(&config.storage_root).expect("unable to open blob store");

    let addr = (config.bind_addr.clone(), config.port);
    info!("listening on {}:{}", addr.0, addr.1);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::new(
                "%a \"%r\" %s %b \"%{Referer}i\" \"%{User-Agent}i\" %T",
            ))
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(storage.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(pages::configure)
            .configure(users::configure)
            .configure(notes::configure)
            .configure(images::configure)
            .configure(audio::configure)
    })
    .bind(addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use actix_http::Request;
    use actix_web::{
        body::MessageBody,
        cookie::Cookie,
        dev::{Service, ServiceResponse},
        http::{header, StatusCode},
        test, web, App,
    };
    use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

    use super::*;
    use crate::storage::Storage;

    struct Env {
        pool: Pool<Sqlite>,
        storage: Storage,
        config: config::Config,
        _dir: tempfile::TempDir,
    }

    async fn env() -> Env {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path()).unwrap();

        let config = config::Config {
            bind_addr: "127.0.0.1".into(),
            port: 0,
            database_url: "sqlite::memory:".into(),
            storage_root: dir.path().to_owned(),
            thumb_bound: 200,
        };

        Env {
            pool,
            storage,
            config,
            _dir: dir,
        }
    }

    macro_rules! app {
        ($env:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($env.pool.clone()))
                    .app_data(web::Data::new($env.storage.clone()))
                    .app_data(web::Data::new($env.config.clone()))
                    .configure(pages::configure)
                    .configure(users::configure)
                    .configure(notes::configure)
                    .configure(images::configure)
                    .configure(audio::configure),
            )
            .await
        };
    }

    async fn register_and_login<S, B>(app: &S, username: &str) -> String
    where
        S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
        B: MessageBody,
        B::Error: std::fmt::Debug,
    {
        let req = test::TestRequest::post()
            .uri("/regist")
            .set_form(&[
                ("username", username),
                ("email", "someone@example.com"),
                ("password", "password123"),
            ])
            .to_request();
        let resp = test::call_service(app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[("username", username), ("password", "password123")])
            .to_request();
        let resp = test::call_service(app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        resp.response()
            .cookies()
            .find(|c| c.name() == "token")
            .expect("login set no token")
            .value()
            .to_owned()
    }

    async fn get_page<S, B>(app: &S, path: &str, token: &str) -> String
    where
        S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
        B: MessageBody,
        B::Error: std::fmt::Debug,
    {
        let req = test::TestRequest::get()
            .uri(path)
            .cookie(Cookie::new("token", token))
            .to_request();
        let resp = test::call_service(app, req).await;
        let body = test::read_body(resp).await;

        String::from_utf8(body.to_vec()).unwrap()
    }

    fn multipart_body(field: &str, filename: &str, mime: &str, data: &[u8]) -> (String, Vec<u8>) {
        let boundary = "----notekeeptestboundary";

        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    fn upload_request(path: &str, token: &str, content_type: String, body: Vec<u8>) -> Request {
        test::TestRequest::post()
            .uri(path)
            .cookie(Cookie::new("token", token))
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request()
    }

    #[actix_web::test]
    async fn note_round_trip() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let req = test::TestRequest::post()
            .uri("/new_form")
            .cookie(Cookie::new("token", token.clone()))
            .set_form(&[("title", "shopping"), ("text", "milk and eggs")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/view_form");

        let listing = get_page(&app, "/view_form", &token).await;
        assert!(listing.contains("shopping"));
        assert!(listing.contains("milk and eggs"));

        // listing twice without writes yields the same page
        assert_eq!(listing, get_page(&app, "/view_form", &token).await);

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM notes")
            .fetch_one(&env.pool)
            .await
            .unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/delete_form/{id}"))
            .cookie(Cookie::new("token", token.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let listing = get_page(&app, "/view_form", &token).await;
        assert!(!listing.contains("shopping"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn invalid_note_rerenders_with_values() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let req = test::TestRequest::post()
            .uri("/new_form")
            .cookie(Cookie::new("token", token.clone()))
            .set_form(&[("title", ""), ("text", "body without a title")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("title must not be empty"));
        // what was typed stays in the form
        assert!(body.contains("body without a title"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn ownership_isolation() {
        let env = env().await;
        let app = app!(env);
        let alice = register_and_login(&app, "alice").await;
        let bob = register_and_login(&app, "bob").await;

        let req = test::TestRequest::post()
            .uri("/new_form")
            .cookie(Cookie::new("token", alice.clone()))
            .set_form(&[("title", "alices secret"), ("text", "do not read")])
            .to_request();
        test::call_service(&app, req).await;

        let listing = get_page(&app, "/view_form", &bob).await;
        assert!(!listing.contains("alices secret"));

        // bob cannot delete what he does not own
        let (id,): (i64,) = sqlx::query_as("SELECT id FROM notes")
            .fetch_one(&env.pool)
            .await
            .unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/delete_form/{id}"))
            .cookie(Cookie::new("token", bob))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[actix_web::test]
    async fn unauthenticated_requests_redirect_to_login() {
        let env = env().await;
        let app = app!(env);

        for path in ["/", "/view_form", "/view_images", "/audio", "/about"] {
            let req = test::TestRequest::get().uri(path).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FOUND, "{path}");
            assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
        }

        // and no mutation happens either
        let req = test::TestRequest::post()
            .uri("/new_form")
            .set_form(&[("title", "sneaky"), ("text", "no session")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn expired_session_redirects_to_login() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        sqlx::query("UPDATE sessions SET expires = 0 WHERE token = ?")
            .bind(&token)
            .execute(&env.pool)
            .await
            .unwrap();

        let req = test::TestRequest::get()
            .uri("/view_form")
            .cookie(Cookie::new("token", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[actix_web::test]
    async fn remember_me_makes_the_cookie_persistent() {
        let env = env().await;
        let app = app!(env);
        register_and_login(&app, "alice").await;

        // a plain login gets a browser-session cookie, nothing persistent
        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[("username", "alice"), ("password", "password123")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        let token = resp
            .response()
            .cookies()
            .find(|c| c.name() == "token")
            .unwrap();
        assert_eq!(token.max_age(), None);

        // with remember the cookie survives a browser restart for as long
        // as the session row does
        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[
                ("username", "alice"),
                ("password", "password123"),
                ("remember", "on"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        let token = resp
            .response()
            .cookies()
            .find(|c| c.name() == "token")
            .unwrap();
        assert_eq!(
            token.max_age().map(|d| d.whole_seconds()),
            Some(auth::REMEMBER_TTL)
        );
    }

    #[actix_web::test]
    async fn expired_sessions_are_purged_on_login() {
        let env = env().await;
        let app = app!(env);
        let stale = register_and_login(&app, "alice").await;

        sqlx::query("UPDATE sessions SET expires = 0 WHERE token = ?")
            .bind(&stale)
            .execute(&env.pool)
            .await
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[("username", "alice"), ("password", "password123")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        // only the fresh session remains
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let stale_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE token = ?")
                .bind(&stale)
                .fetch_one(&env.pool)
                .await
                .unwrap();
        assert_eq!(stale_count, 0);
    }

    #[actix_web::test]
    async fn media_deletion_requires_ownership() {
        let env = env().await;
        let app = app!(env);
        let alice = register_and_login(&app, "alice").await;
        let bob = register_and_login(&app, "bob").await;

        let png = media::sample_png(320, 240);
        let (ct, body) = multipart_body("image", "alices.png", "image/png", &png);
        test::call_service(&app, upload_request("/view_images", &alice, ct, body)).await;

        let clip = b"RIFF....WAVEfmt alices clip".to_vec();
        let (ct, body) = multipart_body("audio", "alices.wav", "audio/wav", &clip);
        test::call_service(&app, upload_request("/audio", &alice, ct, body)).await;

        let (image_id,): (i64,) = sqlx::query_as("SELECT id FROM images")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        let (audio_id,): (i64,) = sqlx::query_as("SELECT id FROM audios")
            .fetch_one(&env.pool)
            .await
            .unwrap();

        for path in [
            format!("/delete_image/{image_id}"),
            format!("/delete_audio/{audio_id}"),
        ] {
            let req = test::TestRequest::get()
                .uri(&path)
                .cookie(Cookie::new("token", bob.clone()))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{path}");
        }

        // nothing was deleted
        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        let audios: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audios")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!((images, audios), (1, 1));
    }

    #[actix_web::test]
    async fn post_about_edits_the_profile() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let boundary = "----notekeeptestboundary";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"email\"\r\n\r\nvia-about@example.com\r\n",
        );
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        let content_type = format!("multipart/form-data; boundary={boundary}");
        let resp =
            test::call_service(&app, upload_request("/about", &token, content_type, body)).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/about");

        let about = get_page(&app, "/about", &token).await;
        assert!(about.contains("via-about@example.com"));
    }

    #[actix_web::test]
    async fn duplicate_registration_is_rejected() {
        let env = env().await;
        let app = app!(env);
        register_and_login(&app, "alice").await;

        let req = test::TestRequest::post()
            .uri("/regist")
            .set_form(&[
                ("username", "alice"),
                ("email", "other@example.com"),
                ("password", "password456"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("already taken"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[actix_web::test]
    async fn wrong_password_rerenders_login() {
        let env = env().await;
        let app = app!(env);
        register_and_login(&app, "alice").await;

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[("username", "alice"), ("password", "password124")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.response().cookies().all(|c| c.name() != "token"));

        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("wrong username or password"));
    }

    #[actix_web::test]
    async fn image_upload_thumbnail_and_deletion() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let png = media::sample_png(800, 600);
        let (content_type, body) = multipart_body("image", "holiday.png", "image/png", &png);
        let resp =
            test::call_service(&app, upload_request("/view_images", &token, content_type, body))
                .await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let (id, file_key, thumb_key, width, height): (i64, String, String, i64, i64) =
            sqlx::query_as("SELECT id, file_key, thumb_key, width, height FROM images")
                .fetch_one(&env.pool)
                .await
                .unwrap();

        assert_eq!((width, height), (800, 600));
        assert_eq!(env.storage.read(&file_key).await.unwrap(), png);

        // thumbnail fits the bound and keeps the 4:3 ratio
        let thumb = env.storage.read(&thumb_key).await.unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        use image::GenericImageView;
        assert_eq!(decoded.dimensions(), (200, 150));

        let detail = get_page(&app, &format!("/detalied_image/{id}"), &token).await;
        assert!(detail.contains("holiday.png"));

        let req = test::TestRequest::get()
            .uri(&format!("/delete_image/{id}"))
            .cookie(Cookie::new("token", token.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        // row and both artifacts are gone
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(env.storage.read(&file_key).await.is_err());
        assert!(env.storage.read(&thumb_key).await.is_err());

        let req = test::TestRequest::get()
            .uri(&format!("/detalied_image/{id}"))
            .cookie(Cookie::new("token", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn corrupt_image_is_rejected_without_commit() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let (content_type, body) =
            multipart_body("image", "notes.txt", "text/plain", b"not an image at all");
        let resp =
            test::call_service(&app, upload_request("/view_images", &token, content_type, body))
                .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let page = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(page.contains("unsupported or corrupt media file"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[actix_web::test]
    async fn concurrent_uploads_never_swap_files() {
        let env = env().await;
        let app = app!(env);
        let alice = register_and_login(&app, "alice").await;
        let bob = register_and_login(&app, "bob").await;

        let alice_png = media::sample_png(640, 480);
        let bob_png = media::sample_png(480, 640);

        let (ct_a, body_a) = multipart_body("image", "alice.png", "image/png", &alice_png);
        let (ct_b, body_b) = multipart_body("image", "bob.png", "image/png", &bob_png);

        let (resp_a, resp_b) = tokio::join!(
            test::call_service(&app, upload_request("/view_images", &alice, ct_a, body_a)),
            test::call_service(&app, upload_request("/view_images", &bob, ct_b, body_b)),
        );
        assert_eq!(resp_a.status(), StatusCode::FOUND);
        assert_eq!(resp_b.status(), StatusCode::FOUND);

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, file_key FROM images ORDER BY name")
                .fetch_all(&env.pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].1, rows[1].1);

        // each row points at its own bytes, not the other upload's
        assert_eq!(env.storage.read(&rows[0].1).await.unwrap(), alice_png);
        assert_eq!(env.storage.read(&rows[1].1).await.unwrap(), bob_png);
    }

    #[actix_web::test]
    async fn audio_round_trip() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let clip = b"RIFF....WAVEfmt fake clip bytes".to_vec();
        let (content_type, body) = multipart_body("audio", "voice.wav", "audio/wav", &clip);
        let resp = test::call_service(&app, upload_request("/audio", &token, content_type, body))
            .await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        let listing = get_page(&app, "/audio", &token).await;
        assert!(listing.contains("voice.wav"));

        let (id, file_key): (i64, String) = sqlx::query_as("SELECT id, file_key FROM audios")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(env.storage.read(&file_key).await.unwrap(), clip);

        let req = test::TestRequest::get()
            .uri(&format!("/delete_audio/{id}"))
            .cookie(Cookie::new("token", token.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);

        assert!(env.storage.read(&file_key).await.is_err());
        let listing = get_page(&app, "/audio", &token).await;
        assert!(!listing.contains("voice.wav"));
    }

    #[actix_web::test]
    async fn profile_edit_and_avatar() {
        let env = env().await;
        let app = app!(env);
        let token = register_and_login(&app, "alice").await;

        let avatar = media::sample_png(300, 300);

        // multipart with a text field for the email plus the avatar file
        let boundary = "----notekeeptestboundary";
        let mut full = Vec::new();
        full.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        full.extend_from_slice(
            b"Content-Disposition: form-data; name=\"email\"\r\n\r\nnew@example.com\r\n",
        );
        full.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        full.extend_from_slice(
            b"Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n",
        );
        full.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        full.extend_from_slice(&avatar);
        full.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let content_type = format!("multipart/form-data; boundary={boundary}");
        let resp =
            test::call_service(&app, upload_request("/edit_user", &token, content_type, full))
                .await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/about");

        let about = get_page(&app, "/about", &token).await;
        assert!(about.contains("new@example.com"));
        assert!(about.contains("/avatar"));

        let req = test::TestRequest::get()
            .uri("/avatar")
            .cookie(Cookie::new("token", token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = test::read_body(resp).await;
        assert!(image::load_from_memory(&bytes).is_ok());
    }
}
