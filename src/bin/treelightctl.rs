use std::process;
use std::time::Duration;

use serde_json::Value;
use treelights::client::{expects_reply, ControlClient};

const USAGE: &str = "usage: treelightctl <host:port> <command> [json-args]";
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Arguments that are not valid JSON are sent as a plain string, so
/// `treelightctl host:12345 loadfile sequences/a.csv` works unquoted.
fn parse_args(raw: Option<String>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
    }
}

fn render_reply(payload: &[u8]) -> String {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::String(text)) => text,
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(payload).to_string()),
        Err(_) => String::from_utf8_lossy(payload).to_string(),
    }
}

fn main() {
    let mut argv = std::env::args().skip(1);
    let (Some(address), Some(command)) = (argv.next(), argv.next()) else {
        eprintln!("{USAGE}");
        process::exit(2);
    };
    let args = parse_args(argv.next());

    let mut client = ControlClient::connect(address.as_str()).unwrap_or_else(|error| {
        eprintln!("{error}");
        process::exit(1);
    });

    if !expects_reply(&command) {
        if let Err(error) = client.send(&command, args) {
            eprintln!("{error}");
            process::exit(1);
        }
        return;
    }

    let reply = client
        .set_reply_timeout(Some(REPLY_TIMEOUT))
        .and_then(|()| client.request(&command, args));
    match reply {
        Ok(payload) => println!("{}", render_reply(&payload)),
        Err(error) => {
            eprintln!("{error}");
            process::exit(1);
        }
    }
}
