use std::fmt;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};

pub const USAGE: &str = "\
hubpower <BUSNUM:DEVNUM> power {<PORTNUM> (on|off)} ...
       hubpower <BUSNUM:DEVNUM> status
       hubpower <BUSNUM:DEVNUM> bind";

/// Bus and device number of the target hub, both in 1..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    pub bus: u8,
    pub device: u8,
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bus, self.device)
    }
}

fn parse_number(text: &str, what: &str) -> Result<u8, String> {
    match text.trim().parse::<u16>() {
        Ok(n @ 1..=255) => Ok(n as u8),
        _ => Err(format!("{what} must be a decimal number between 1 and 255, got {text:?}")),
    }
}

pub fn parse_address(text: &str) -> Result<DeviceAddress, String> {
    let (bus, device) = text
        .split_once(':')
        .ok_or_else(|| format!("expected busnum:devnum, got {text:?}"))?;
    Ok(DeviceAddress {
        bus: parse_number(bus, "busnum")?,
        device: parse_number(device, "devnum")?,
    })
}

/// Lenient port number parsing: optional sign followed by leading digits,
/// anything after them ignored. Text without digits reads as 0, which no
/// hub accepts as a port.
pub fn parse_port_token(token: &str) -> i64 {
    let token = token.trim_start();
    let (negative, rest) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };
    let value = rest
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(i64::from(d - b'0')));
    if negative { -value } else { value }
}

#[derive(Parser, Debug)]
#[command(
    name = "hubpower",
    about,
    override_usage = USAGE,
    disable_help_flag = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Hub to control, as busnum:devnum
    #[arg(value_name = "BUSNUM:DEVNUM", value_parser = parse_address)]
    pub device: DeviceAddress,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Switch port power, given as pairs of port number and on|off
    #[command(disable_help_flag = true)]
    Power {
        #[arg(value_name = "PORTNUM STATE", num_args = 0.., allow_hyphen_values = true)]
        pairs: Vec<String>,
    },
    /// Print the status of every port
    #[command(disable_help_flag = true)]
    Status,
    /// Ask the kernel to rebind its hub driver
    #[command(disable_help_flag = true)]
    Bind,
}

impl Action {
    /// Port/state token pairs of a `power` request, in command-line order.
    pub fn power_pairs(&self) -> Vec<(&str, &str)> {
        match self {
            Action::Power { pairs } => pairs
                .chunks_exact(2)
                .map(|pair| (pair[0].as_str(), pair[1].as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Cli {
    /// Parse and validate arguments. Nothing here touches a device.
    pub fn try_parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Self::try_parse_from(args)?;
        if let Action::Power { pairs } = &cli.action {
            if pairs.len() % 2 != 0 {
                return Err(Self::command().error(
                    ErrorKind::WrongNumberOfValues,
                    "power expects pairs of <PORTNUM> (on|off)",
                ));
            }
        }
        Ok(cli)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_form() {
        let cli = Cli::try_parse_args(["hubpower", "2:5", "status"]).unwrap();
        assert_eq!(cli.device, DeviceAddress { bus: 2, device: 5 });
        assert_eq!(cli.action, Action::Status);
    }

    #[test]
    fn parses_bind_form() {
        let cli = Cli::try_parse_args(["hubpower", "1:255", "bind"]).unwrap();
        assert_eq!(cli.device, DeviceAddress { bus: 1, device: 255 });
        assert_eq!(cli.action, Action::Bind);
    }

    #[test]
    fn parses_power_pairs_in_order() {
        let cli =
            Cli::try_parse_args(["hubpower", "2:5", "power", "3", "on", "-1", "off"]).unwrap();
        assert_eq!(cli.action.power_pairs(), vec![("3", "on"), ("-1", "off")]);
    }

    #[test]
    fn power_without_pairs_is_accepted() {
        let cli = Cli::try_parse_args(["hubpower", "2:5", "power"]).unwrap();
        assert!(cli.action.power_pairs().is_empty());
    }

    #[test]
    fn odd_power_arguments_are_a_usage_error() {
        let err = Cli::try_parse_args(["hubpower", "2:5", "power", "3", "on", "4"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongNumberOfValues);
    }

    #[test]
    fn trailing_arguments_after_status_or_bind_are_rejected() {
        assert!(Cli::try_parse_args(["hubpower", "2:5", "status", "1"]).is_err());
        assert!(Cli::try_parse_args(["hubpower", "2:5", "bind", "x"]).is_err());
    }

    #[test]
    fn help_and_version_are_not_accepted_forms() {
        let cases: [&[&str]; 5] = [
            &["hubpower", "--help"],
            &["hubpower", "-h"],
            &["hubpower", "-V"],
            &["hubpower", "2:5", "help"],
            &["hubpower", "2:5", "status", "--help"],
        ];
        for args in cases {
            let err = Cli::try_parse_args(args).unwrap_err();
            assert_ne!(err.kind(), ErrorKind::DisplayHelp, "{args:?}");
            assert_ne!(err.kind(), ErrorKind::DisplayVersion, "{args:?}");
        }
    }

    #[test]
    fn unknown_action_and_missing_action_are_rejected() {
        assert!(Cli::try_parse_args(["hubpower", "2:5", "reset"]).is_err());
        assert!(Cli::try_parse_args(["hubpower", "2:5"]).is_err());
        assert!(Cli::try_parse_args(["hubpower"]).is_err());
    }

    #[test]
    fn address_bounds() {
        assert!(parse_address("0:5").is_err());
        assert!(parse_address("2:256").is_err());
        assert!(parse_address("2-5").is_err());
        assert!(parse_address("x:5").is_err());
        assert_eq!(parse_address("255:1").unwrap(), DeviceAddress { bus: 255, device: 1 });
    }

    #[test]
    fn port_tokens_parse_like_atoi() {
        assert_eq!(parse_port_token("3"), 3);
        assert_eq!(parse_port_token("12abc"), 12);
        assert_eq!(parse_port_token("-2"), -2);
        assert_eq!(parse_port_token("+7"), 7);
        assert_eq!(parse_port_token("on"), 0);
        assert_eq!(parse_port_token(""), 0);
    }
}
