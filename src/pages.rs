use actix_web::{get, web, HttpRequest, HttpResponse};
use maud::{html, Markup, DOCTYPE};
use sqlx::{Pool, Sqlite};

use crate::{auth::Session, error::AppError, model::User, util};

fn header() -> Markup {
    html! {
        (DOCTYPE)
        meta charset="utf-8";
        meta name="viewport" content="width=device-width, initial-scale=1.0";
        title { "notekeep" }
        script src="https://cdn.tailwindcss.com" {}
    }
}

pub fn messagebox(msg: &str) -> Markup {
    html! {
        div class="p-4 border-4 border-rose-500 text-rose-500 mb-4 text-center" {
            h2 {
                (msg)
            }
        }
    }
}

fn navbar(user: &User) -> Markup {
    html! {
        div class="flex flex-row gap-4 p-4 bg-zinc-900" {
            a href="/" class="hover:text-cyan-400" { "Home" }
            a href="/view_form" class="hover:text-cyan-400" { "Notes" }
            a href="/new_form" class="hover:text-cyan-400" { "New note" }
            a href="/view_images" class="hover:text-cyan-400" { "Images" }
            a href="/audio" class="hover:text-cyan-400" { "Audio" }
            a href="/about" class="hover:text-cyan-400" { "Profile" }
            span class="ml-auto" { "Hi, " (user.username) "!" }
            a href="/logout" class="hover:text-cyan-400" { "Logout" }
        }
    }
}

pub fn layout(user: Option<&User>, content: Markup) -> Markup {
    html! {
        (header())
        body class="bg-zinc-800 text-[#f2f7f2]" {
            @if let Some(user) = user {
                (navbar(user))
            }
            div class="flex flex-col w-full" {
                div class="m-auto text-center p-4" {
                    (content)
                }
            }
        }
    }
}

/// Renders the one-shot flash message left by a redirecting handler, if any.
pub fn take_flash(req: &HttpRequest) -> Markup {
    match req.cookie("msg") {
        Some(x) => messagebox(x.value()),
        None => html! {},
    }
}

/// Full page response that also clears the flash cookie.
pub fn respond(page: Markup) -> HttpResponse {
    let mut response = HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(page.into_string());

    let _ = response.add_removal_cookie(&actix_web::cookie::Cookie::named("msg"));

    response
}

pub fn error_page(msg: &str) -> Markup {
    layout(None, html! { (messagebox(msg)) a href="/" { "back" } })
}

pub fn login_page(flash: Markup, username: &str) -> Markup {
    layout(
        None,
        html! {
            (flash)
            h1 class="justify-center text-center" { "login" }
            form action="/login" method="post" class="mt-4 flex flex-col" {
                input type="text" name="username" placeholder="username" value=(username) autocomplete="off" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                input type="password" name="password" placeholder="password" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                label class="mb-4" {
                    input type="checkbox" name="remember" value="on";
                    " remember me"
                }
                button type="submit" class="rounded-lg m-auto bg-zinc-700 hover:bg-cyan-700 py-1 px-2" { "log in" }
                br;
                a href="/regist" class="justify-center text-center" { "register instead" }
            }
        },
    )
}

pub fn regist_page(flash: Markup, username: &str, email: &str, phone: &str) -> Markup {
    layout(
        None,
        html! {
            (flash)
            h1 class="justify-center text-center" { "register" }
            form action="/regist" method="post" class="mt-4 flex flex-col" {
                input type="text" name="username" placeholder="username" value=(username) autocomplete="off" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                input type="text" name="email" placeholder="email" value=(email) autocomplete="off" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                input type="text" name="phone" placeholder="phone (optional)" value=(phone) autocomplete="off" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                input type="password" name="password" placeholder="password" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                button type="submit" class="rounded-lg m-auto bg-zinc-700 hover:bg-cyan-700 py-1 px-2" { "sign up" }
            }
        },
    )
}

#[get("/")]
async fn index(
    req: HttpRequest,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let uid = session.user.id;

    let notes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes WHERE owner = ?")
        .bind(uid)
        .fetch_one(&**sql)
        .await?;
    let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE owner = ?")
        .bind(uid)
        .fetch_one(&**sql)
        .await?;
    let audios: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audios WHERE owner = ?")
        .bind(uid)
        .fetch_one(&**sql)
        .await?;

    let page = layout(
        Some(&session.user),
        html! {
            (take_flash(&req))
            h1 class="text-xl mb-4" { "dashboard" }
            table class="table-auto m-auto" {
                tr class="odd:bg-zinc-900" {
                    td class="px-4" { a href="/view_form" { "Notes" } }
                    td class="px-4" { (notes) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4" { a href="/view_images" { "Images" } }
                    td class="px-4" { (images) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4" { a href="/audio" { "Audio clips" } }
                    td class="px-4" { (audios) }
                }
            }
        },
    );

    Ok(respond(page))
}

#[get("/login")]
async fn login(req: HttpRequest, session: Option<Session>) -> HttpResponse {
    if session.is_some() {
        return util::redirect("/");
    }

    respond(login_page(take_flash(&req), ""))
}

#[get("/regist")]
async fn regist(req: HttpRequest, session: Option<Session>) -> HttpResponse {
    if session.is_some() {
        return util::redirect("/");
    }

    respond(regist_page(take_flash(&req), "", "", ""))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index).service(login).service(regist);
}
