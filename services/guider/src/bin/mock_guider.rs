//! Mock guider server for testing
//!
//! Answers the line-delimited JSON protocol with canned responses and
//! emits a Version and AppState event on every connection. Used for
//! exercising process management and connection handling by hand.
//!
//! Usage:
//!   mock_guider [--port PORT]
//!
//! The port can also be set via the MOCK_GUIDER_PORT environment variable.
//! Command line argument takes precedence over environment variable.
//! Default port is 4400.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() {
    // Port priority: command line arg > environment variable > default (4400)
    let port = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("MOCK_GUIDER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(4400u16);

    eprintln!("Mock guider starting on port {}", port);

    let listener = match TcpListener::bind(format!("127.0.0.1:{}", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));

    // Set a timeout so we can check the shutdown flag periodically
    listener
        .set_nonblocking(true)
        .expect("Cannot set non-blocking");

    eprintln!("Mock guider listening on port {}", port);

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                eprintln!("Connection from {}", addr);
                let shutdown_clone = shutdown.clone();
                std::thread::spawn(move || {
                    handle_client(stream, shutdown_clone);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No connection available, sleep briefly
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(e) => {
                eprintln!("Accept error: {}", e);
            }
        }
    }

    eprintln!("Mock guider shutting down");
}

fn handle_client(mut stream: TcpStream, shutdown: Arc<AtomicBool>) {
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(1)))
        .ok();
    stream
        .set_write_timeout(Some(std::time::Duration::from_secs(5)))
        .ok();

    // Send Version and AppState events on connect, like the real thing
    let events = [
        r#"{"Event":"Version","PHDVersion":"2.6.13-mock","PHDSubver":"test","MsgVersion":1}"#,
        r#"{"Event":"AppState","State":"Looping"}"#,
    ];
    for event in events {
        if writeln!(stream, "{}", event).is_err() || stream.flush().is_err() {
            return;
        }
    }

    let reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => {
            eprintln!("Could not clone stream: {}", e);
            return;
        }
    };

    for line in reader.lines() {
        match line {
            Ok(request) => {
                if request.is_empty() {
                    continue;
                }

                eprintln!("Received: {}", request);

                let response = handle_request(&request, &shutdown);
                eprintln!("Sending: {}", response);

                if writeln!(stream, "{}", response).is_err() {
                    break;
                }
                if stream.flush().is_err() {
                    break;
                }

                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Timeout, check shutdown flag
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                continue;
            }
            Err(_) => {
                break;
            }
        }
    }

    eprintln!("Client disconnected");
}

fn handle_request(request: &str, shutdown: &Arc<AtomicBool>) -> String {
    let req: serde_json::Value = match serde_json::from_str(request) {
        Ok(v) => v,
        Err(_) => {
            return r#"{"id":"","error":{"code":-32700,"message":"Parse error"}}"#.to_string();
        }
    };

    let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let method = req.get("method").and_then(|m| m.as_str()).unwrap_or("");

    let result = match method {
        "get_app_state" => serde_json::json!("Looping"),
        "get_connected" => serde_json::json!(true),
        "set_connected" => serde_json::json!(0),
        "get_profiles" => serde_json::json!([
            {"id": 1, "name": "Mock Profile"}
        ]),
        "get_profile" => serde_json::json!({"id": 1, "name": "Mock Profile"}),
        "set_profile" => serde_json::json!(0),
        "get_exposure" => serde_json::json!(1000),
        "get_camera_frame_size" => serde_json::json!([640, 480]),
        "get_calibrated" => serde_json::json!(false),
        "clear_calibration" => serde_json::json!(0),
        "get_lock_position" => serde_json::json!([320.0, 240.0]),
        "find_star" => serde_json::json!([320.0, 240.0]),
        "set_paused" => serde_json::json!(0),
        "guide" => serde_json::json!(0),
        "loop" => serde_json::json!(0),
        "stop_capture" => serde_json::json!(0),
        "dither" => serde_json::json!(0),
        "get_pixel_scale" => serde_json::json!(1.31),
        "get_lock_shift_params" => serde_json::json!({
            "enabled": false,
            "rate": [0.0, 0.0],
            "units": "arcsec/hr",
            "axes": "RA/Dec"
        }),
        "set_lock_shift_params" => serde_json::json!(0),
        "set_lock_shift_enabled" => serde_json::json!(0),
        "shutdown" => {
            eprintln!("Shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
            serde_json::json!(0)
        }
        _ => {
            return format!(
                r#"{{"id":{},"error":{{"code":-32601,"message":"Method not found: {}"}}}}"#,
                id, method
            );
        }
    };

    format!(r#"{{"id":{},"result":{}}}"#, id, result)
}
