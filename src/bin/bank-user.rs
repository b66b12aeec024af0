//! Bank client binary.
//!
//! Usage: `bank-user <account_id> <password> <delay_ms> <operation> [args...]`
//!
//! Operations:
//! - `0` create account (admin only): `<new_id> <balance> <new_password>`
//! - `1` balance query: no extra arguments
//! - `2` transfer: `<dest_id> <amount>`
//! - `3` shutdown (admin only): no extra arguments
//!
//! Prints one result line and exits 0 on `OK`, 1 otherwise.

use securebank::client;
use securebank::config::{valid_password, ClientConfig};
use securebank::protocol::{
    OpKind, ReplyValue, Request, RetCode, MAX_BALANCE, MAX_BANK_ACCOUNTS, MAX_OP_DELAY_MS,
    MIN_BALANCE,
};
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("usage: bank-user <account_id> <password> <delay_ms> <operation> [args...]");
    eprintln!("  operation 0 (create account): <new_id> <balance> <new_password>");
    eprintln!("  operation 1 (balance)");
    eprintln!("  operation 2 (transfer): <dest_id> <amount>");
    eprintln!("  operation 3 (shutdown)");
    std::process::exit(1);
}

fn fail(message: &str) -> ! {
    eprintln!("bank-user: {message}");
    std::process::exit(1);
}

fn parse_request(args: &[String]) -> Request {
    if args.len() < 4 {
        usage();
    }
    let pid = std::process::id();
    let Ok(account_id) = args[0].parse::<u32>() else {
        usage();
    };
    let password = args[1].clone();
    let Ok(op_delay_ms) = args[2].parse::<u32>() else {
        usage();
    };
    let Some(kind) = args[3].parse::<u32>().ok().and_then(OpKind::from_wire) else {
        usage();
    };
    let op_args = &args[4..];

    if account_id > MAX_BANK_ACCOUNTS {
        fail("account id out of range");
    }
    if !valid_password(&password) {
        fail("password must be 8..=20 characters without whitespace");
    }
    if op_delay_ms > MAX_OP_DELAY_MS {
        fail("operation delay out of range");
    }

    match kind {
        OpKind::CreateAccount => {
            let [new_id, balance, new_password] = op_args else {
                usage();
            };
            let (Ok(new_id), Ok(balance)) = (new_id.parse::<u32>(), balance.parse::<u32>())
            else {
                usage();
            };
            if new_id == 0 || new_id > MAX_BANK_ACCOUNTS {
                fail("new account id out of range");
            }
            if !(MIN_BALANCE..=MAX_BALANCE).contains(&balance) {
                fail("initial balance out of range");
            }
            if !valid_password(new_password) {
                fail("new password must be 8..=20 characters without whitespace");
            }
            Request::create_account(
                pid,
                account_id,
                &password,
                op_delay_ms,
                new_id,
                balance,
                new_password,
            )
        }
        OpKind::Balance => {
            if !op_args.is_empty() {
                usage();
            }
            Request::balance(pid, account_id, &password, op_delay_ms)
        }
        OpKind::Transfer => {
            let [dest_id, amount] = op_args else {
                usage();
            };
            let (Ok(dest_id), Ok(amount)) = (dest_id.parse::<u32>(), amount.parse::<u32>())
            else {
                usage();
            };
            if !(MIN_BALANCE..=MAX_BALANCE).contains(&amount) {
                fail("transfer amount out of range");
            }
            Request::transfer(pid, account_id, &password, op_delay_ms, dest_id, amount)
        }
        OpKind::Shutdown => {
            if !op_args.is_empty() {
                usage();
            }
            Request::shutdown(pid, account_id, &password, op_delay_ms)
        }
    }
}

#[tokio::main]
async fn main() -> securebank::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = parse_request(&args);

    let reply = client::run_request(&ClientConfig::default(), &request).await?;
    match reply.value {
        ReplyValue::None => println!("{}", reply.ret_code.label()),
        ReplyValue::Balance(v) => println!("{} balance={}", reply.ret_code.label(), v),
        ReplyValue::Transfer(v) => println!("{} source_balance={}", reply.ret_code.label(), v),
        ReplyValue::Shutdown(v) => println!("{} pending_requests={}", reply.ret_code.label(), v),
    }
    std::process::exit(if reply.ret_code == RetCode::Ok { 0 } else { 1 });
}
