use actix_web::{get, post, web, HttpRequest, HttpResponse};
use maud::{html, Markup};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use crate::{auth::Session, error::AppError, model::Note, pages, util, validation};

fn note_form_page(user: &crate::model::User, flash: Markup, title: &str, body: &str) -> Markup {
    pages::layout(
        Some(user),
        html! {
            (flash)
            h1 class="text-xl mb-4" { "new note" }
            form action="/new_form" method="post" class="mt-4 flex flex-col" {
                input type="text" name="title" value=(title) placeholder="title" autocomplete="off" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2 text-center";
                textarea name="text" placeholder="text" rows="8" class="rounded-lg mb-4 bg-zinc-700 py-1 px-2" { (body) }
                button type="submit" class="rounded-lg m-auto bg-zinc-700 hover:bg-cyan-700 py-1 px-2" { "save" }
            }
        },
    )
}

#[get("/new_form")]
async fn new_form(req: HttpRequest, session: Session) -> HttpResponse {
    pages::respond(note_form_page(
        &session.user,
        pages::take_flash(&req),
        "",
        "",
    ))
}

#[derive(Deserialize, Debug)]
struct NoteForm {
    title: String,
    text: String,
}

#[post("/new_form")]
async fn create_note(
    form: web::Form<NoteForm>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    for (value, field) in [(&form.title, "title"), (&form.text, "text")] {
        if let Err(AppError::Validation(msg)) = validation::required(value, field) {
            // invalid input re-renders the form with what was typed, no mutation
            return Ok(pages::respond(note_form_page(
                &session.user,
                pages::messagebox(&msg),
                &form.title,
                &form.text,
            )));
        }
    }

    sqlx::query("INSERT INTO notes (owner, title, body, created) VALUES (?, ?, ?, ?)")
        .bind(session.user.id)
        .bind(form.title.trim())
        .bind(&form.text)
        .bind(util::now_unix())
        .execute(&**sql)
        .await?;

    Ok(util::redirect("/view_form"))
}

#[get("/view_form")]
async fn view_form(
    req: HttpRequest,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let notes = sqlx::query_as::<_, Note>(
        "SELECT * FROM notes WHERE owner = ? ORDER BY created DESC, id DESC",
    )
    .bind(session.user.id)
    .fetch_all(&**sql)
    .await?;

    let page = pages::layout(
        Some(&session.user),
        html! {
            (pages::take_flash(&req))
            h1 class="text-xl mb-4" { "notes" }
            @if notes.is_empty() {
                p { "no notes yet. " a href="/new_form" class="hover:text-cyan-400" { "write one" } }
            }
            @for note in &notes {
                div class="rounded-lg bg-zinc-900 p-4 mb-4 text-left max-w-prose" {
                    div class="flex flex-row" {
                        h2 class="font-bold" { (note.title) }
                        span class="ml-auto text-zinc-400" { (util::format_ts(note.created)) }
                    }
                    p class="whitespace-pre-wrap" { (note.body) }
                    a href=(format!("/delete_form/{}", note.id)) class="text-rose-500 hover:text-rose-300" { "delete" }
                }
            }
        },
    );

    Ok(pages::respond(page))
}

#[get("/delete_form/{id}")]
async fn delete_form(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let note = sqlx::query_as::<_, Note>("SELECT * FROM notes WHERE id = ?")
        .bind(*id)
        .fetch_optional(&**sql)
        .await?
        .ok_or(AppError::NotFound)?;

    if note.owner != session.user.id {
        return Err(AppError::Forbidden);
    }

    sqlx::query("DELETE FROM notes WHERE id = ?")
        .bind(note.id)
        .execute(&**sql)
        .await?;

    Ok(util::flash_redirect("/view_form", "note deleted"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(new_form)
        .service(create_note)
        .service(view_form)
        .service(delete_form);
}
