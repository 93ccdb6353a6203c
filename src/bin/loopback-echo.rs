//! Echo a message through the loopback session library.
//!
//! A listener, a client and the accepted server session all run on one
//! worker. Readiness polled from the library's multiplexer is routed to the
//! file events by token and lands in a queue drained by the loop below.

use getopts::Options;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::process;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info};
use vcl_io::host::{
    Buffer, ChainBuffer, FileReadyType, FileTriggerType, IoHandle, LocalDispatcher, SocketType,
};
use vcl_io::event::dispatch_ready;
use vcl_io::{Config, Loopback, VclIoHandle, VclSocketInterface, logging};

const DEFAULT_ADDRESS: &str = "127.0.0.1:12221";
const DEFAULT_MESSAGE: &str = "hello, vcl";
const MAX_ITERATIONS: usize = 1024;

type ReadyQueue = Rc<RefCell<VecDeque<(u64, FileReadyType)>>>;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {program} [options]");
    print!("{}", opts.usage(&brief));
}

fn opts() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "config", "TOML config file", "FILE");
    opts.optopt("a", "address", "listen address", "ADDR");
    opts.optopt("m", "message", "message to echo", "TEXT");
    opts.optflag("h", "help", "print this help menu");
    opts
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("Failed to parse command line args: {f}");
            process::exit(1);
        }
    };

    if matches.opt_present("help") {
        print_usage(&program, &opts);
        return;
    }

    let config = match matches.opt_str("config") {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    logging::init(&config.logging);

    let address = matches
        .opt_str("address")
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let address: SocketAddr = match address.parse() {
        Ok(address) => address,
        Err(e) => {
            error!(%address, error = %e, "bad listen address");
            process::exit(1);
        }
    };
    let message = matches
        .opt_str("message")
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    match run(&config, address, message.as_bytes()) {
        Ok(echoed) => info!(echoed = %String::from_utf8_lossy(&echoed), "echo complete"),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}

fn watch(
    handle: &mut VclIoHandle,
    dispatcher: &LocalDispatcher,
    ready: &ReadyQueue,
    events: FileReadyType,
) {
    let token = handle.token();
    let ready = ready.clone();
    handle.initialize_file_event(
        dispatcher,
        Box::new(move |events| ready.borrow_mut().push_back((token, events))),
        FileTriggerType::Level,
        events,
    );
}

fn run(config: &Config, address: SocketAddr, message: &[u8]) -> Result<Vec<u8>, String> {
    let library = Arc::new(Loopback::new());
    let interface = VclSocketInterface::new(library.clone(), config.file_events.activation);
    let worker = interface.worker_context().resolve_or_register();
    let dispatcher = LocalDispatcher::new();
    let ready: ReadyQueue = Rc::new(RefCell::new(VecDeque::new()));

    let mut listener = interface
        .session(SocketType::Stream)
        .map_err(|e| format!("failed to create listener: {e}"))?;
    listener
        .bind(&address)
        .map_err(|e| format!("failed to bind {address}: {e}"))?;
    listener
        .listen(16)
        .map_err(|e| format!("failed to listen on {address}: {e}"))?;
    watch(&mut listener, &dispatcher, &ready, FileReadyType::READ);
    info!(%address, worker, activation = ?config.file_events.activation, "listening");

    let mut client = interface
        .session(SocketType::Stream)
        .map_err(|e| format!("failed to create client: {e}"))?;
    client
        .connect(&address)
        .map_err(|e| format!("failed to connect to {address}: {e}"))?;
    watch(&mut client, &dispatcher, &ready, FileReadyType::READ);

    let mut request = ChainBuffer::new();
    request.add(message);
    while !request.is_empty() {
        client
            .write(&mut request)
            .map_err(|e| format!("failed to send request: {e}"))?;
    }

    let mut sessions: HashMap<u64, VclIoHandle> = HashMap::new();
    let mut response = ChainBuffer::new();

    for _ in 0..MAX_ITERATIONS {
        dispatch_ready(library.epoll_wait(worker));
        dispatcher.run_iteration();

        let batch: Vec<_> = ready.borrow_mut().drain(..).collect();
        for (token, events) in batch {
            debug!(token, ?events, "ready");
            if token == listener.token() {
                let (mut accepted, peer) = match listener.accept_session() {
                    Ok(accepted) => accepted,
                    Err(e) if e.is_again() => continue,
                    Err(e) => return Err(format!("accept failed: {e}")),
                };
                info!(%peer, sh = accepted.sh(), "accepted");
                watch(&mut accepted, &dispatcher, &ready, FileReadyType::READ);
                sessions.insert(accepted.token(), accepted);
            } else if token == client.token() {
                match client.read(&mut response, None) {
                    Ok(_) => {}
                    Err(e) if e.is_again() => {}
                    Err(e) => return Err(format!("client read failed: {e}")),
                }
                if response.len() >= message.len() {
                    return Ok(response.to_vec());
                }
            } else if let Some(session) = sessions.get_mut(&token) {
                let mut buffer = ChainBuffer::new();
                match session.read(&mut buffer, None) {
                    Ok(0) => {
                        sessions.remove(&token);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) if e.is_again() => continue,
                    Err(e) => return Err(format!("server read failed: {e}")),
                }
                while !buffer.is_empty() {
                    session
                        .write(&mut buffer)
                        .map_err(|e| format!("server write failed: {e}"))?;
                }
            }
        }
    }

    Err(format!("no echo after {MAX_ITERATIONS} iterations"))
}
