use authkeep_core::{AccessToken, Registration};
use colored::Colorize;
use serde_json::{Value, json};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_token(token: &AccessToken, format: OutputFormat) {
    let value = json!({
        "access_token": token.access_token,
        "token_type": token.token_type,
        "expires_in": token.expires_in,
        "refresh_token": token.refresh_token,
        "scope": token.scope,
        "created_on": token.created_on.to_string(),
        "expires_at": token.expires_at(0).map(|at| at.to_string()),
    });
    print_object(&value, format);
}

/// Prints a registration with its client secret masked.
pub fn print_registration(registration: &Registration, format: OutputFormat) {
    let value = json!({
        "handle": registration.handle,
        "token_url": registration.token_url,
        "authorization_url": registration.authorization_url,
        "client_id": registration.client_id,
        "client_secret": registration.client_secret.as_ref().map(|_| "********"),
        "scope": registration.scope,
        "redirect_uri": registration.redirect_uri,
        "supports_basic_auth": registration.supports_basic_auth,
        "expiry_buffer_secs": registration.expiry_buffer_secs,
    });
    print_object(&value, format);
}

pub fn print_handles(handles: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", Value::from(handles.to_vec())),
        OutputFormat::Table => {
            if handles.is_empty() {
                println!("No handles registered.");
                return;
            }
            let mut builder = Builder::default();
            builder.push_record(["Handle"]);
            for handle in handles {
                builder.push_record([handle.as_str()]);
            }
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
}

fn print_object(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        },
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(["Field", "Value"]);
            if let Value::Object(fields) = value {
                for (name, field) in fields {
                    let shown = match field {
                        Value::Null => "-".to_string(),
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    builder.push_record([name.clone(), shown]);
                }
            }
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
}
