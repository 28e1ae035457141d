use actix_multipart::Multipart;
use actix_web::{
    cookie::{Cookie, SameSite},
    get, post, routes, web, HttpRequest, HttpResponse,
};
use maud::html;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use crate::{
    auth::{self, Session},
    error::{on_unique_violation, AppError},
    media, pages, storage::Storage, util, validation,
};

// avatars get normalized to a bounded PNG before storage
const AVATAR_BOUND: u32 = 512;

#[derive(Deserialize, Debug)]
struct LoginForm {
    pub username: String,
    pub password: String,
    pub remember: Option<String>,
}

#[post("/login")]
async fn login(
    form: web::Form<LoginForm>,
    sql: web::Data<Pool<Sqlite>>,
    session: Option<Session>,
) -> Result<HttpResponse, AppError> {
    if session.is_some() {
        return Ok(util::redirect("/"));
    }

    if form.username.trim().is_empty() || form.password.is_empty() {
        return Ok(pages::respond(pages::login_page(
            pages::messagebox("username and password must not be empty"),
            &form.username,
        )));
    }

    let user = sqlx::query_as::<_, crate::model::User>(
        "SELECT * FROM users WHERE username = ?",
    )
    .bind(&form.username)
    .fetch_optional(&**sql)
    .await?;

    // same rendering for unknown user and wrong password
    let user = match user {
        Some(x) if auth::verify_password(&form.password, &x.password).is_ok() => x,
        _ => {
            return Ok(pages::respond(pages::login_page(
                pages::messagebox(&AppError::InvalidCredentials.to_string()),
                &form.username,
            )));
        }
    };

    let remember = form.remember.is_some();
    let token = auth::create_session(&sql, user.id, remember).await?;

    let mut cookie = Cookie::build("token", token)
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Strict)
        .finish();

    // without an explicit max-age the browser drops the cookie when it
    // closes, which would make the long-lived session row unreachable
    if remember {
        cookie.set_max_age(actix_web::cookie::time::Duration::seconds(
            auth::REMEMBER_TTL,
        ));
    }

    Ok(HttpResponse::Found()
        .cookie(cookie)
        .append_header((actix_web::http::header::LOCATION, "/"))
        .finish())
}

#[get("/logout")]
async fn logout(req: HttpRequest, sql: web::Data<Pool<Sqlite>>) -> Result<HttpResponse, AppError> {
    if let Some(token) = req.cookie("token") {
        auth::destroy_session(&sql, token.value()).await?;
    }

    let mut response = util::flash_redirect("/login", "logged out");
    let _ = response.add_removal_cookie(&Cookie::named("token"));

    Ok(response)
}

#[derive(Deserialize)]
struct RegistrationForm {
    username: String,
    email: String,
    phone: Option<String>,
    password: String,
}

#[post("/regist")]
async fn regist(
    form: web::Form<RegistrationForm>,
    sql: web::Data<Pool<Sqlite>>,
    session: Option<Session>,
) -> Result<HttpResponse, AppError> {
    if session.is_some() {
        return Ok(util::redirect("/"));
    }

    let phone = form.phone.as_deref().unwrap_or("").trim();

    let rerender = |msg: &str| {
        Ok(pages::respond(pages::regist_page(
            pages::messagebox(msg),
            &form.username,
            &form.email,
            phone,
        )))
    };

    if let Err(x) = validation::username(&form.username) {
        return rerender(x);
    }

    if let Err(x) = validation::email(&form.email) {
        return rerender(x);
    }

    if let Err(x) = validation::password(&form.password) {
        return rerender(x);
    }

    let hash = auth::hash_password(&form.password).map_err(|_| AppError::Hash)?;
    let phone_value = (!phone.is_empty()).then(|| phone.to_owned());

    let inserted = sqlx::query(
        "INSERT INTO users (username, email, phone, password) VALUES (?, ?, ?, ?)",
    )
    .bind(&form.username)
    .bind(&form.email)
    .bind(&phone_value)
    .bind(&hash)
    .execute(&**sql)
    .await;

    if let Err(e) = inserted {
        return match on_unique_violation(e, AppError::DuplicateLogin) {
            AppError::DuplicateLogin => rerender(&AppError::DuplicateLogin.to_string()),
            other => Err(other),
        };
    }

    Ok(util::flash_redirect("/login", "registration successful"))
}

#[get("/about")]
async fn about(req: HttpRequest, session: Session) -> HttpResponse {
    let user = &session.user;

    let page = pages::layout(
        Some(user),
        html! {
            (pages::take_flash(&req))
            h1 class="text-xl mb-4" { "profile" }
            @if user.avatar_key.is_some() {
                img src="/avatar" class="rounded-full m-auto mb-4 max-h-[128px] max-w-[128px]";
            }
            table class="table-auto m-auto" {
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "username" }
                    td class="px-4" { (user.username) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "email" }
                    td class="px-4" { (user.email) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "phone" }
                    td class="px-4" { (user.phone.as_deref().unwrap_or("-")) }
                }
            }
            br;
            a href="/edit_user" class="hover:text-cyan-400" { "edit profile" }
        },
    );

    pages::respond(page)
}

fn edit_user_page(user: &crate::model::User, flash: maud::Markup) -> maud::Markup {
    pages::layout(
        Some(user),
        html! {
            (flash)
            h1 class="text-xl mb-4" { "edit profile" }
            form action="/edit_user" method="post" enctype="multipart/form-data" class="mt-4 flex flex-col" {
                input type="text" name="email" value=(user.email) placeholder="email" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                input type="text" name="phone" value=(user.phone.as_deref().unwrap_or("")) placeholder="phone (optional)" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                label class="mb-4" {
                    "avatar: "
                    input type="file" name="avatar" accept="image/*";
                }
                button type="submit" class="rounded-lg m-auto bg-zinc-700 hover:bg-cyan-700 py-1 px-2" { "save" }
            }
        },
    )
}

#[get("/edit_user")]
async fn edit_user_form(req: HttpRequest, session: Session) -> HttpResponse {
    pages::respond(edit_user_page(&session.user, pages::take_flash(&req)))
}

#[routes]
#[post("/edit_user")]
#[post("/about")]
async fn edit_user(
    payload: Multipart,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let form = match media::receive_form(payload).await {
        Ok(x) => x,
        Err(AppError::Validation(msg)) => {
            return Ok(pages::respond(edit_user_page(
                &session.user,
                pages::messagebox(&msg),
            )));
        }
        Err(e) => return Err(e),
    };

    let email = form.field("email").trim().to_owned();
    let phone = form.field("phone").trim().to_owned();

    if let Err(x) = validation::email(&email) {
        return Ok(pages::respond(edit_user_page(
            &session.user,
            pages::messagebox(x),
        )));
    }

    // a freshly picked avatar is normalized and stored before the row is
    // touched; the row never points at a blob that is not on disk
    let new_avatar = match form.file("avatar") {
        Some(part) => {
            let thumb = match media::thumbnail(&part.data, AVATAR_BOUND) {
                Ok(x) => x,
                Err(AppError::UnsupportedMedia) => {
                    return Ok(pages::respond(edit_user_page(
                        &session.user,
                        pages::messagebox(&AppError::UnsupportedMedia.to_string()),
                    )));
                }
                Err(e) => return Err(e),
            };

            Some(storage.put(&thumb.bytes).await?)
        }
        None => None,
    };

    let phone_value = (!phone.is_empty()).then_some(phone);

    match &new_avatar {
        Some(key) => {
            sqlx::query("UPDATE users SET email = ?, phone = ?, avatar_key = ? WHERE id = ?")
                .bind(&email)
                .bind(&phone_value)
                .bind(key)
                .bind(session.user.id)
                .execute(&**sql)
                .await?;

            if let Some(old) = &session.user.avatar_key {
                storage.remove(old).await;
            }
        }
        None => {
            sqlx::query("UPDATE users SET email = ?, phone = ? WHERE id = ?")
                .bind(&email)
                .bind(&phone_value)
                .bind(session.user.id)
                .execute(&**sql)
                .await?;
        }
    }

    Ok(util::flash_redirect("/about", "profile updated"))
}

#[get("/avatar")]
async fn avatar(session: Session, storage: web::Data<Storage>) -> Result<HttpResponse, AppError> {
    let key = session.user.avatar_key.as_deref().ok_or(AppError::NotFound)?;
    let bytes = storage.read(key).await?;

    Ok(HttpResponse::Ok().content_type("image/png").body(bytes))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(login)
        .service(logout)
        .service(regist)
        .service(about)
        .service(edit_user_form)
        .service(edit_user)
        .service(avatar);
}
