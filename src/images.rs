use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use bytesize::ByteSize;
use log::debug;
use maud::{html, Markup};
use sqlx::{Pool, Sqlite};

use crate::{
    auth::Session, config::Config, error::AppError, media, model::Image, pages, storage::Storage,
    util,
};

async fn fetch_owned(
    sql: &Pool<Sqlite>,
    id: i64,
    owner: i64,
) -> Result<Image, AppError> {
    let image = sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = ?")
        .bind(id)
        .fetch_optional(sql)
        .await?
        .ok_or(AppError::NotFound)?;

    if image.owner != owner {
        return Err(AppError::Forbidden);
    }

    Ok(image)
}

fn gallery_page(user: &crate::model::User, flash: Markup, images: &[Image]) -> Markup {
    pages::layout(
        Some(user),
        html! {
            (flash)
            h1 class="text-xl mb-4" { "images" }
            form action="/view_images" method="post" enctype="multipart/form-data" class="mb-4" {
                input type="file" name="image" accept="image/*";
                button type="submit" class="rounded-lg bg-zinc-700 hover:bg-cyan-700 py-1 px-2" { "upload" }
            }
            @if images.is_empty() {
                p { "no images yet" }
            } @else {
                table class="table-auto m-auto" {
                    tr class="text-center odd:bg-zinc-900" {
                        th class="px-4" { "Preview" }
                        th class="px-4" { "Name" }
                        th class="px-4" { "Dimensions" }
                        th class="px-4" { "Size" }
                        th class="px-4" { "Added on" }
                        th class="px-4" { "Actions" }
                    }
                    @for entry in images {
                        tr class="text-center odd:bg-zinc-900 hover:bg-cyan-900" {
                            td class="px-4" {
                                a href=(format!("/detalied_image/{}", entry.id)) {
                                    img class="rounded-md max-h-[90px] m-auto" src=(format!("/image_thumb/{}", entry.id));
                                }
                            }
                            td class="px-4" { (entry.name) }
                            td class="px-4" { (entry.width) "x" (entry.height) }
                            td class="px-4" { (ByteSize(entry.size as u64).to_string()) }
                            td class="px-4" { (util::format_ts(entry.created)) }
                            td class="px-4" {
                                a href=(format!("/detalied_image/{}", entry.id)) class="hover:text-cyan-400 px-1" { "detail" }
                                a href=(format!("/delete_image/{}", entry.id)) class="text-rose-500 hover:text-rose-300 px-1" { "delete" }
                            }
                        }
                    }
                }
            }
        },
    )
}

async fn list_for(sql: &Pool<Sqlite>, owner: i64) -> Result<Vec<Image>, AppError> {
    Ok(sqlx::query_as::<_, Image>(
        "SELECT * FROM images WHERE owner = ? ORDER BY created DESC, id DESC",
    )
    .bind(owner)
    .fetch_all(sql)
    .await?)
}

#[get("/view_images")]
async fn view_images(
    req: HttpRequest,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let images = list_for(&sql, session.user.id).await?;

    Ok(pages::respond(gallery_page(
        &session.user,
        pages::take_flash(&req),
        &images,
    )))
}

#[post("/view_images")]
async fn upload_image(
    payload: Multipart,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    // any recoverable problem re-renders the gallery with a message and
    // persists nothing
    let rerender = |images: &[Image], msg: &str| {
        Ok(pages::respond(gallery_page(
            &session.user,
            pages::messagebox(msg),
            images,
        )))
    };

    let form = match media::receive_form(payload).await {
        Ok(x) => x,
        Err(AppError::Validation(msg)) => {
            let images = list_for(&sql, session.user.id).await?;
            return rerender(&images, &msg);
        }
        Err(e) => return Err(e),
    };

    let part = match form.file("image") {
        Some(x) => x,
        None => {
            let images = list_for(&sql, session.user.id).await?;
            return rerender(&images, "image must not be empty");
        }
    };

    let thumb = match media::thumbnail(&part.data, config.thumb_bound) {
        Ok(x) => x,
        Err(AppError::UnsupportedMedia) => {
            let images = list_for(&sql, session.user.id).await?;
            return rerender(&images, &AppError::UnsupportedMedia.to_string());
        }
        Err(e) => return Err(e),
    };

    let info = media::describe(&part.data);
    let (width, height) = info.dimensions.unwrap_or((0, 0));

    debug!(
        "upload: {} ({}, {}x{}, {} bytes)",
        part.filename, part.mime, width, height, info.size
    );

    // blobs first, row second: a crash in between orphans a file but never
    // leaves a row pointing at nothing
    let file_key = storage.put(&part.data).await?;
    let thumb_key = match storage.put(&thumb.bytes).await {
        Ok(x) => x,
        Err(e) => {
            storage.remove(&file_key).await;
            return Err(e);
        }
    };

    let inserted = sqlx::query(
        "INSERT INTO images (owner, name, mime, file_key, thumb_key, width, height, size, created) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session.user.id)
    .bind(&part.filename)
    .bind(part.mime.to_string())
    .bind(&file_key)
    .bind(&thumb_key)
    .bind(width as i64)
    .bind(height as i64)
    .bind(info.size)
    .bind(info.created)
    .execute(&**sql)
    .await;

    if let Err(e) = inserted {
        storage.remove(&file_key).await;
        storage.remove(&thumb_key).await;
        return Err(e.into());
    }

    Ok(util::flash_redirect("/view_images", "image uploaded"))
}

#[get("/detalied_image/{id}")]
async fn detailed_image(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
) -> Result<HttpResponse, AppError> {
    let image = fetch_owned(&sql, *id, session.user.id).await?;

    let page = pages::layout(
        Some(&session.user),
        html! {
            h1 class="text-xl mb-4" { (image.name) }
            img class="m-auto rounded-md max-w-full" src=(format!("/image_file/{}", image.id));
            table class="table-auto m-auto mt-4" {
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "dimensions" }
                    td class="px-4" { (image.width) "x" (image.height) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "size" }
                    td class="px-4" { (ByteSize(image.size as u64).to_string()) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "type" }
                    td class="px-4" { (image.mime) }
                }
                tr class="odd:bg-zinc-900" {
                    td class="px-4 text-right" { "added on" }
                    td class="px-4" { (util::format_ts(image.created)) }
                }
            }
            br;
            a href=(format!("/delete_image/{}", image.id)) class="text-rose-500 hover:text-rose-300" { "delete" }
            " | "
            a href="/view_images" class="hover:text-cyan-400" { "back" }
        },
    );

    Ok(pages::respond(page))
}

#[get("/delete_image/{id}")]
async fn delete_image(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let image = fetch_owned(&sql, *id, session.user.id).await?;

    // row first, then both blobs: the record never outlives its thumbnail
    sqlx::query("DELETE FROM images WHERE id = ?")
        .bind(image.id)
        .execute(&**sql)
        .await?;

    storage.remove(&image.file_key).await;
    storage.remove(&image.thumb_key).await;

    Ok(util::flash_redirect("/view_images", "image deleted"))
}

#[get("/image_file/{id}")]
async fn image_file(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let image = fetch_owned(&sql, *id, session.user.id).await?;
    let bytes = storage.read(&image.file_key).await?;

    Ok(HttpResponse::Ok()
        .append_header((
            "Content-Disposition",
            format!("inline; filename=\"{}\"", image.name),
        ))
        .content_type(image.mime.as_str())
        .body(bytes))
}

#[get("/image_thumb/{id}")]
async fn image_thumb(
    id: web::Path<i64>,
    session: Session,
    sql: web::Data<Pool<Sqlite>>,
    storage: web::Data<Storage>,
) -> Result<HttpResponse, AppError> {
    let image = fetch_owned(&sql, *id, session.user.id).await?;
    let bytes = storage.read(&image.thumb_key).await?;

    Ok(HttpResponse::Ok().content_type("image/png").body(bytes))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(view_images)
        .service(upload_image)
        .service(detailed_image)
        .service(delete_image)
        .service(image_file)
        .service(image_thumb);
}
