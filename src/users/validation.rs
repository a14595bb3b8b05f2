use std::collections::{BTreeMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::users::dto::{BulkUserRequest, LoginRequest, ProfileUpdateRequest, SignupRequest};

/// Field name to the first rule that field violated.
pub type FieldErrors = BTreeMap<String, String>;

const ALLOWED_TLDS: &[&str] = &[
    "com", "org", "net", "biz", "co", "in", "edu", "gov", "mil", "info", "io", "me", "us", "uk",
];
const ALLOWED_MULTI_LEVEL_DOMAINS: &[&str] = &["co.in", "org.in", "co.uk", "org.uk", "ac.in", "edu.in"];
const RESERVED_USERNAMES: &[&str] = &[".", "..", "", "/"];
const PASSWORD_SPECIALS: &str = "@$!%*?&";

const USERNAME_REQUIRED: &str = "Username is required";
const USERNAME_RESERVED: &str = "Username cannot contain periods, slashes, or be empty";
const USERNAME_TOO_SHORT: &str = "Username must be at least 3 characters";
const USERNAME_TOO_LONG: &str = "Username must not exceed 30 characters";
const USERNAME_CHARSET: &str = "Username can only contain letters, numbers, underscores, or hyphens";
const EMAIL_REQUIRED: &str = "Email is required";
const EMAIL_INVALID: &str = "Invalid email domain (e.g., use .com, .in, .co.in)";
const PHONE_INVALID: &str = "Invalid phone number (e.g., +1234567890)";
const PASSWORD_REQUIRED: &str = "Password is required";
const LOGIN_ID_REQUIRED: &str = "Email or username is required";

struct StrengthMessages {
    too_short: &'static str,
    too_weak: &'static str,
}

const SIGNUP_PASSWORD: StrengthMessages = StrengthMessages {
    too_short: "Password must be at least 8 characters",
    too_weak: "Password must include uppercase, lowercase, number, and special character (@$!%*?&)",
};
const NEW_PASSWORD: StrengthMessages = StrengthMessages {
    too_short: "New password must be at least 8 characters",
    too_weak: "New password must include uppercase, lowercase, number, and special character (@$!%*?&)",
};

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9]\d{1,14}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z0-9-]{2,63}$"
    )
    .unwrap();
}

#[derive(Default)]
struct Collector(FieldErrors);

impl Collector {
    fn check(&mut self, field: impl Into<String>, result: Result<(), &'static str>) {
        if let Err(message) = result {
            self.0.entry(field.into()).or_insert_with(|| message.to_string());
        }
    }

    fn finish(self) -> Option<FieldErrors> {
        (!self.0.is_empty()).then_some(self.0)
    }
}

fn trimmed(value: Option<&String>) -> &str {
    value.map(|v| v.trim()).unwrap_or_default()
}

pub(crate) fn check_username(value: &str) -> Result<(), &'static str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(USERNAME_REQUIRED);
    }
    if RESERVED_USERNAMES.contains(&value) {
        return Err(USERNAME_RESERVED);
    }
    let len = value.chars().count();
    if len < 3 {
        return Err(USERNAME_TOO_SHORT);
    }
    if len > 30 {
        return Err(USERNAME_TOO_LONG);
    }
    if !USERNAME_RE.is_match(value) {
        return Err(USERNAME_CHARSET);
    }
    Ok(())
}

/// Well-formed address whose last label is an allow-listed TLD.
fn is_strict_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if email.len() > 254 || local.len() > 64 || !EMAIL_RE.is_match(email) {
        return false;
    }
    domain
        .rsplit('.')
        .next()
        .map(|tld| ALLOWED_TLDS.contains(&tld.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn has_multi_level_domain(email: &str) -> bool {
    let Some((_, domain)) = email.split_once('@') else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    ALLOWED_MULTI_LEVEL_DOMAINS
        .iter()
        .any(|multi| domain.ends_with(&format!(".{multi}")))
}

pub(crate) fn check_email(value: &str) -> Result<(), &'static str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EMAIL_REQUIRED);
    }
    if is_strict_email(value) || has_multi_level_domain(value) {
        Ok(())
    } else {
        Err(EMAIL_INVALID)
    }
}

pub(crate) fn check_phone(value: Option<&String>) -> Result<(), &'static str> {
    let value = trimmed(value);
    if value.is_empty() || PHONE_RE.is_match(value) {
        Ok(())
    } else {
        Err(PHONE_INVALID)
    }
}

fn check_strength(value: &str, messages: &StrengthMessages) -> Result<(), &'static str> {
    if value.chars().count() < 8 {
        return Err(messages.too_short);
    }
    let strong = value.chars().any(|c| c.is_ascii_lowercase())
        && value.chars().any(|c| c.is_ascii_uppercase())
        && value.chars().any(|c| c.is_ascii_digit())
        && value.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if strong {
        Ok(())
    } else {
        Err(messages.too_weak)
    }
}

fn check_signup_password(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err(PASSWORD_REQUIRED);
    }
    check_strength(value, &SIGNUP_PASSWORD)
}

fn check_login_id(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err(LOGIN_ID_REQUIRED);
    }
    if value.contains('@') {
        check_email(value)
    } else {
        check_username(value)
    }
}

pub fn validate_signup(req: &SignupRequest) -> Option<FieldErrors> {
    let mut errors = Collector::default();
    errors.check("username", check_username(trimmed(req.username.as_ref())));
    errors.check("email", check_email(trimmed(req.email.as_ref())));
    errors.check("phone", check_phone(req.phone.as_ref()));
    errors.check("password", check_signup_password(trimmed(req.password.as_ref())));
    errors.finish()
}

pub fn validate_login(req: &LoginRequest) -> Option<FieldErrors> {
    let mut errors = Collector::default();
    errors.check("loginId", check_login_id(trimmed(req.login_id.as_ref())));
    if trimmed(req.password.as_ref()).is_empty() {
        errors.check("password", Err(PASSWORD_REQUIRED));
    }
    errors.finish()
}

pub fn validate_profile_update(req: &ProfileUpdateRequest) -> Option<FieldErrors> {
    let mut errors = Collector::default();
    errors.check("email", check_email(trimmed(req.email.as_ref())));

    let old = trimmed(req.old_password.as_ref());
    let new = trimmed(req.new_password.as_ref());
    match (old.is_empty(), new.is_empty()) {
        (true, true) => {}
        (true, false) => {
            errors.check("oldPassword", Err("Old password is required to set a new password"));
        }
        (false, true) => {
            errors.check(
                "newPassword",
                Err("New password is required when old password is provided"),
            );
        }
        (false, false) => {
            errors.check("newPassword", check_strength(new, &NEW_PASSWORD));
            if old == new {
                errors.check("newPassword", Err("New password must differ from old password"));
            }
        }
    }
    errors.finish()
}

/// Checks every element of a bulk replace with the single-record field
/// rules, plus uniqueness inside the array. Keys are `"<index>.<field>"`.
pub fn validate_bulk(records: &[BulkUserRequest]) -> Option<FieldErrors> {
    let mut errors = Collector::default();
    let mut ids = HashSet::new();
    let mut usernames = HashSet::new();
    let mut emails = HashSet::new();

    for (i, rec) in records.iter().enumerate() {
        let username = trimmed(rec.username.as_ref());
        let email = trimmed(rec.email.as_ref());

        match rec.id {
            Some(id) if id > 0 => {
                if !ids.insert(id) {
                    errors.check(format!("{i}.id"), Err("ID already in use"));
                }
            }
            _ => errors.check(format!("{i}.id"), Err("ID must be a positive integer")),
        }

        errors.check(format!("{i}.username"), check_username(username));
        if !usernames.insert(username.to_string()) {
            errors.check(format!("{i}.username"), Err("Username already exists"));
        }

        errors.check(format!("{i}.email"), check_email(email));
        if !emails.insert(email.to_ascii_lowercase()) {
            errors.check(format!("{i}.email"), Err("Email already exists"));
        }

        errors.check(format!("{i}.phone"), check_phone(rec.phone.as_ref()));
        if trimmed(rec.password.as_ref()).is_empty() {
            errors.check(format!("{i}.password"), Err(PASSWORD_REQUIRED));
        }
    }
    errors.finish()
}
