use crate::error::AppError;

/// Uniform rule for form fields: declared fields are mandatory unless
/// explicitly optional.
pub fn required(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }

    Ok(())
}

pub fn username(name: &str) -> Result<(), &'static str> {
    if !(3..32).contains(&name.len()) {
        return Err("username: length out of range");
    }

    if name
        .chars()
        .any(|x| !x.is_ascii_alphanumeric() && !x.is_ascii_punctuation())
    {
        return Err("username: disallowed characters");
    }

    Ok(())
}

pub fn password(password: &str) -> Result<(), &'static str> {
    if !(8..).contains(&password.len()) {
        return Err("password: too short");
    }

    Ok(())
}

pub fn email(email: &str) -> Result<(), &'static str> {
    // just enough structure to catch typos, not RFC 5322
    if email.len() < 3 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err("email: malformed address");
    }

    Ok(())
}

#[test]
fn username_validation() {
    username("notetaker").unwrap();
    username("xd").unwrap_err();
    username("RealMan420").unwrap();
    username("a.b_c-d").unwrap();
    username("waaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaay_too_long").unwrap_err();
    username("päärynä").unwrap_err();
    username("normalname\n").unwrap_err();
    username("two words").unwrap_err();
}

#[test]
fn password_validation() {
    password("123456").unwrap_err();
    password("aa").unwrap_err();
    password("OIASUHDOPIAHSDOPIHASOPDHPAOISHDPOAISHDPOASHDOPAISHD").unwrap();
    password(".6WV@Ud35VBnHeOiK&F!kr':Sh+s90v$").unwrap();
}

#[test]
fn email_validation() {
    email("someone@example.com").unwrap();
    email("a@b").unwrap();
    email("nope").unwrap_err();
    email("@example.com").unwrap_err();
    email("someone@").unwrap_err();
}

#[test]
fn required_fields() {
    required("hello", "title").unwrap();
    assert!(matches!(
        required("   ", "title"),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(required("", "body"), Err(AppError::Validation(_))));
}
