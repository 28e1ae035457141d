use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub avatar_key: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct Note {
    pub id: i64,
    pub owner: i64,
    pub title: String,
    pub body: String,
    pub created: i64,
}

#[derive(Debug, FromRow)]
pub struct Image {
    pub id: i64,
    pub owner: i64,
    pub name: String,
    pub mime: String,
    pub file_key: String,
    pub thumb_key: String,
    pub width: i64,
    pub height: i64,
    pub size: i64,
    pub created: i64,
}

#[derive(Debug, FromRow)]
pub struct Audio {
    pub id: i64,
    pub owner: i64,
    pub name: String,
    pub mime: String,
    pub file_key: String,
    pub size: i64,
    pub created: i64,
}
