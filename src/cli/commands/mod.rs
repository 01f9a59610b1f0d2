pub mod auth;
pub mod logging;
pub mod session;
pub mod store;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const CMD_TOTP_SECRET: &str = "totp-secret";
pub const ARG_ACCOUNT: &str = "account";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("authcore")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("AUTHCORE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .subcommand(
            Command::new(CMD_TOTP_SECRET)
                .about("Generate a TOTP secret and, optionally, its provisioning URL")
                .arg(
                    Arg::new(ARG_ACCOUNT)
                        .long(ARG_ACCOUNT)
                        .help("Account name to embed in the otpauth:// URL"),
                ),
        );

    let command = store::with_args(command);
    let command = session::with_args(command);
    let command = auth::with_args(command);
    logging::with_args(command)
}
