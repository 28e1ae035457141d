use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use bytesize::ByteSize;
use maud::{html, Markup};
use sqlx::{Pool, Sqlite};

use crate::{
    auth::Session, error::AppError, media, model::Audio, pages, storage::Storage, util,
};

async fn fetch_owned(sql: &Pool<Sqlite>, id: i64, owner: i64) -> Result<Audio, AppError> {
    let audio = sqlx::query_as::<_, Audio>("SELECT * FROM audios WHERE id = ?")
        .bind(id)
        .fetch_optional(sql)
        .await?
        .ok_or(AppError::NotFound)?;

    if audio.owner != owner {
        return Err(AppError::Forbidden);
    }

    Ok(audio)
}

fn listing_page(user: &crate::model::User, flash: Markup, clips: &[Audio]) -> Markup {
    pages::layout(
        Some(user),
        html! {
            (flash)
            h1 class="text-xl mb-4" { "audio clips" }
            form action="/audio" method="post" enctype="multipart/form-data" class="mb-4" {
                input type="file" name="audio" accept="audio/*";
                button type="submit" class="rounded-lg bg-zinc-700 hover:bg-cyan-700 py-1 px-2" { "upload" }
            }
            @if clips.is_empty() {
                p { "no audio clips yet" }
            } @else {
                table class="table-auto m-auto" {
                    tr class="text-center odd:bg-zinc-900" {
                        th class="px-4" { "Name" }
                        th class="px-4" { "Size" }
                        th class="px-4" { "Added on" }
                        th class="px-4" { "Actions" }
                    }
                    @for entry in clips {
                        tr class="text-center odd:bg-zinc-900 hover:bg-cyan-900" {
                            td class="px-4" {
                                a href=(format!("/detalied_audio/{}", entry.id)) class="hover:text-cyan-400" { (entry.name) }
                            }
                            td class="px-4" { (ByteSize(entry.size as u64).to_string()) }
                            td class="px-4" { (util::format_ts(entry.created)) }
                            td class="px-4" {
                                a href=(format!("/detalied_audio/{}", entry.id)) class="hover:text-cyan-400 px-1" { "detail" }
                                a href=(format!("/delete_audio/{}", entry.id)) class="text-rose-500 hover:text-rose-300 px-1" { "delete" }
                            }
                        }
                    }
                }
            }
        },
    )
}

async fn list_for(sql: &Pool<Sqlite>, owner: i64) -> Result<Vec<Audio>, AppError> {
    Ok(sqlx::query_as::<_, Audio>(
        "SELECT * FROM audios WHERE owner = ? ORDER BY created DESC, id DESC",
    )
    .bind(owner)
    .fetch_all(sql)
    .await?)
}

#[get("/audio")]
async fn view_audio(
    req: HttpRequest,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let clips = list_for(&sql, session.user.id).await?;

    Ok(pages::respond(listing_page(
        &session.user,
        pages::take_flash(&req),
        &clips,
    )))
}

#[post("/audio")]
async fn upload_audio(
    payload: Multipart,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let rerender = |clips: &[Audio], msg: &str| {
        Ok(pages::respond(listing_page(
            &session.user,
            pages::messagebox(msg),
            clips,
        )))
    };

    let form = match media::receive_form(payload).await {
        Ok(x) => x,
        Err(AppError::Validation(msg)) => {
            let clips = list_for(&sql, session.user.id).await?;
            return rerender(&clips, &msg);
        }
        Err(e) => return Err(e),
    };

    let part = match form.file("audio") {
        Some(x) => x,
        None => {
            let clips = list_for(&sql, session.user.id).await?;
            return rerender(&clips, "audio must not be empty");
        }
    };

    let info = media::describe(&part.data);

    // blob first, row second
    let file_key = storage.put(&part.data).await?;

    let inserted = sqlx::query(
        "INSERT INTO audios (owner, name, mime, file_key, size, created) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(session.user.id)
    .bind(&part.filename)
    .bind(part.mime.to_string())
    .bind(&file_key)
    .bind(info.size)
    .bind(info.created)
    .execute(&**sql)
    .await;

    if let Err(e) = inserted {
        storage.remove(&file_key).await;
        return Err(e.into());
    }

    Ok(util::flash_redirect("/audio", "audio uploaded"))
}

#[get("/detalied_audio/{id}")]
async fn detailed_audio(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let audio = fetch_owned(&sql, *id, session.user.id).await?;

    let page = pages::layout(
        Some(&session.user),
        html! {
            h1 class="text-xl mb-4" { (audio.name) }
            audio controls src=(format!("/audio_file/{}", audio.id)) class="m-auto" {}
            table class="table-auto m-auto mt-4" {
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "size" }
                    td class="px-4" { (ByteSize(audio.size as u64).to_string()) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "type" }
                    td class="px-4" { (audio.mime) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "added on" }
                    td class="px-4" { (util::format_ts(audio.created)) }
                }
            }
            br;
            a href=(format!("/delete_audio/{}", audio.id)) class="text-rose-500 hover:text-rose-300" { "delete" }
            " | "
            a href="/audio" class="hover:text-cyan-400" { "back" }
        },
    );

    Ok(pages::respond(page))
}

#[get("/delete_audio/{id}")]
async fn delete_audio(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let audio = fetch_owned(&sql, *id, session.user.id).await?;

    sqlx::query("DELETE FROM audios WHERE id = ?")
        .bind(audio.id)
        .execute(&**sql)
        .await?;

    storage.remove(&audio.file_key).await;

    Ok(util::flash_redirect("/audio", "audio deleted"))
}

#[get("/audio_file/{id}")]
async fn audio_file(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let audio = fetch_owned(&sql, *id, session.user.id).await?;
    let bytes = storage.read(&audio.file_key).await?;

    Ok(HttpResponse::Ok()
        .append_header((
            "Content-Disposition",
            format!("inline; filename=\"{}\"", audio.name),
        ))
        .content_type(audio.mime.as_str())
        .body(bytes))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(view_audio)
        .service(upload_audio)
        .service(detailed_audio)
        .service(delete_audio)
        .service(audio_file);
}
