use colored::Colorize;
use macros_rs::{crashln, string, ternary};
use serde_json::json;
use std::io::{self, Write as _};

use srvman::{
    auth, helpers,
    helpers::ColoredString,
    process,
    store::{
        scripts,
        users::{self, Role},
    },
};

use tabled::{
    settings::{
        object::{Columns, Rows, Segment},
        style::{BorderColor, Style},
        themes::Colorization,
        Color, Modify, Width,
    },
    Table, Tabled,
};

pub fn get_version(short: bool) -> String {
    return match short {
        true => format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        false => format!(
            "{} ({} {}) [{}]",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH"),
            env!("BUILD_DATE"),
            env!("PROFILE")
        ),
    };
}

pub fn list(format: &String) {
    let scripts = match scripts::list() {
        Ok(scripts) => scripts,
        Err(err) => crashln!("{} Failed to read the script store: {err}", *helpers::FAIL),
    };

    #[derive(Tabled, Debug)]
    struct ScriptItem {
        id: ColoredString,
        name: String,
        #[tabled(rename = "type")]
        kind: String,
        pid: String,
        uptime: String,
        status: ColoredString,
        cpu: String,
        mem: String,
        ports: String,
    }

    impl serde::Serialize for ScriptItem {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let trimmed_json = json!({
                "cpu": &self.cpu.trim(),
                "mem": &self.mem.trim(),
                "id": &self.id.0.trim(),
                "pid": &self.pid.trim(),
                "name": &self.name.trim(),
                "kind": &self.kind.trim(),
                "ports": &self.ports.trim(),
                "uptime": &self.uptime.trim(),
                "status": &self.status.0.trim(),
            });
            trimmed_json.serialize(serializer)
        }
    }

    if scripts.is_empty() {
        println!("{} Script table empty", *helpers::SUCCESS);
        return;
    }

    let mut items: Vec<ScriptItem> = Vec::new();

    for script in &scripts {
        let status = process::probe(&script.id);

        let cpu = match status.cpu {
            Some(percent) => format!("{percent:.2}%  "),
            None => string!("0.00%  "),
        };

        let mem = match status.memory_mb {
            Some(mb) => format!("{mb:.1}mb  "),
            None => string!("0b  "),
        };

        let ports = ternary!(
            status.ports.is_empty(),
            string!("none  "),
            format!(
                "{}  ",
                status
                    .ports
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<String>>()
                    .join(", ")
            )
        );

        items.push(ScriptItem {
            cpu,
            mem,
            ports,
            id: script.id.clone().cyan().bold().into(),
            name: format!("{}   ", script.name),
            kind: format!("{:?}   ", script.kind).to_lowercase(),
            pid: match status.pid {
                Some(pid) => format!("{pid}  "),
                None => string!("n/a  "),
            },
            uptime: match &status.uptime_human {
                Some(uptime) => format!("{uptime}  "),
                None => string!("0s  "),
            },
            status: ternary!(
                status.running,
                "online   ".green().bold(),
                "stopped   ".red().bold()
            )
            .into(),
        });
    }

    let table = Table::new(&items)
        .with(Style::modern().remove_verticals())
        .with(
            Modify::new(Segment::all()).with(BorderColor::filled(Color::new(
                "\x1b[38;2;45;55;72m",
                "\x1b[39m",
            ))),
        )
        .with(Colorization::exact([Color::FG_BRIGHT_CYAN], Rows::first()))
        .with(Modify::new(Columns::single(1)).with(Width::truncate(40).suffix("... ")))
        .to_string();

    if let Ok(json) = serde_json::to_string(&items) {
        match format.as_str() {
            "raw" => println!("{items:?}"),
            "json" => println!("{json}"),
            "default" => println!("{table}"),
            _ => {}
        };
    };
}

pub fn logs(id: &String, lines: usize) {
    let path = process::log_path(id);

    if !path.exists() {
        crashln!("{} No log file for script [{id}] yet", *helpers::FAIL);
    }

    println!(
        "{}",
        format!("Showing last {lines} lines for script [{id}] (change the value with --lines option)").yellow()
    );

    for line in process::read_log(id, lines) {
        println!("{line}");
    }
}

pub fn flush(id: &String) {
    match process::flush_log(id) {
        Ok(()) => println!("{} Flushed the log of script [{id}]", *helpers::SUCCESS),
        Err(err) => crashln!("{} Failed to flush the log of script [{id}]: {err}", *helpers::FAIL),
    }
}

pub fn user_add(username: &String, admin: bool) {
    let existing = match auth::list_users() {
        Ok(users) => users,
        Err(err) => crashln!("{} Failed to read the user store: {err}", *helpers::FAIL),
    };

    // The first account always gets admin, there is nobody to promote it later
    let role = ternary!(admin || existing.is_empty(), Role::Admin, Role::User);

    if existing.is_empty() && !admin {
        println!("{} First user gets the admin role", *helpers::INFO);
    }

    let password = prompt("Password");
    let confirm = prompt("Confirm password");

    if password.is_empty() {
        crashln!("{} Password cannot be empty", *helpers::FAIL);
    }

    if password != confirm {
        crashln!("{} Passwords do not match", *helpers::FAIL);
    }

    match auth::create_user(username, &password, role) {
        Ok(user) => println!(
            "{} Added {} user '{}'",
            *helpers::SUCCESS,
            format!("{:?}", user.role).to_lowercase(),
            user.username
        ),
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    }
}

pub fn user_remove(username: &String) {
    match auth::remove_user(username) {
        Ok(()) => println!("{} Removed user '{username}'", *helpers::SUCCESS),
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    }
}

/// Local reset, skips the current-password check the dashboard enforces.
pub fn user_passwd(username: &String) {
    match users::find(username) {
        Ok(Some(_)) => {}
        Ok(None) => crashln!("{} User '{username}' not found", *helpers::FAIL),
        Err(err) => crashln!("{} Failed to read the user store: {err}", *helpers::FAIL),
    }

    let password = prompt("New password");
    let confirm = prompt("Confirm password");

    if password.is_empty() {
        crashln!("{} Password cannot be empty", *helpers::FAIL);
    }

    if password != confirm {
        crashln!("{} Passwords do not match", *helpers::FAIL);
    }

    match users::set_password_hash(username, &auth::hash_password(&password)) {
        Ok(()) => println!("{} Updated password of '{username}'", *helpers::SUCCESS),
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    }
}

pub fn user_list() {
    let users = match auth::list_users() {
        Ok(users) => users,
        Err(err) => crashln!("{} Failed to read the user store: {err}", *helpers::FAIL),
    };

    if users.is_empty() {
        println!("{} No users yet, add one with `srvman user add <username>`", *helpers::SUCCESS);
        return;
    }

    #[derive(Tabled, Debug)]
    struct UserItem {
        username: ColoredString,
        role: String,
        #[tabled(rename = "last login")]
        last_login: String,
    }

    let items = users
        .iter()
        .map(|user| UserItem {
            username: user.username.clone().cyan().bold().into(),
            role: format!("{:?}   ", user.role).to_lowercase(),
            last_login: match user.last_login {
                Some(time) => format!("{} ago  ", helpers::format_duration(time)),
                None => string!("never  "),
            },
        })
        .collect::<Vec<UserItem>>();

    let table = Table::new(&items)
        .with(Style::modern().remove_verticals())
        .with(
            Modify::new(Segment::all()).with(BorderColor::filled(Color::new(
                "\x1b[38;2;45;55;72m",
                "\x1b[39m",
            ))),
        )
        .with(Colorization::exact([Color::FG_BRIGHT_CYAN], Rows::first()))
        .to_string();

    println!("{table}");
}

// Plain stdin prompt, the input echoes
fn prompt(label: &str) -> String {
    let mut input = String::new();

    print!("{label}: ");

    if io::stdout().flush().is_err() {
        crashln!("{} Failed to flush stdout", *helpers::FAIL);
    }

    if io::stdin().read_line(&mut input).is_err() {
        crashln!("{} Failed to read input", *helpers::FAIL);
    }

    string!(input.trim_end_matches(['\r', '\n']))
}
