use std::sync::{Arc, Mutex};

use http::{Method, StatusCode, Uri};
use mantle::middleware::{Counters, Instrument, Monitor};
use mantle::{handler_fn, BoxedHandler, BufferedWriter, Chain, Error, Handler, Request, ResponseWriter};

fn get(path: &'static str) -> Request {
    Request::new(Method::GET, Uri::from_static(path))
}

#[tokio::test]
async fn counters_track_outcomes() {
    let app = handler_fn(|req, w| Box::pin(async move {
        match req.path() {
            "/missing" => w.write_header(StatusCode::NOT_FOUND),
            "/fail" => Err(Error::handler("nope")),
            _ => {
                w.write(b"twelve bytes").await?;
                Ok(())
            }
        }
    }));
    let counters = Counters::new();
    let chain = Chain::new(app).with(Monitor::new("users", counters.clone()));

    for path in ["/", "/", "/missing", "/fail"] {
        let _ = chain.dispatch(get(path), &mut BufferedWriter::new()).await;
    }

    let stats = counters.snapshot("users").unwrap();
    assert_eq!(stats.requests, 4);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.response_bytes, 24);
    assert_eq!(stats.status_classes, [0, 2, 0, 1, 0]);
    assert_eq!(counters.handler_names(), ["users"]);
}

#[tokio::test]
async fn a_panicking_handler_leaves_the_gauge_balanced() {
    let panicking = handler_fn(|req, _w| Box::pin(async move {
        assert_eq!(req.path(), "/never", "handler panicked");
        Ok(())
    }));
    let counters = Counters::new();
    let chain = Arc::new(Chain::new(panicking).with(Monitor::new("app", counters.clone())));

    let joined = tokio::spawn(async move {
        chain.dispatch(get("/"), &mut BufferedWriter::new()).await
    })
    .await;
    assert!(joined.unwrap_err().is_panic());

    let stats = counters.snapshot("app").unwrap();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn names_are_kept_apart() {
    let ok = || handler_fn(|_req, _w| Box::pin(async move { Ok(()) }));
    let counters = Counters::new();
    let users = Chain::new(ok()).with(Monitor::new("users", counters.clone()));
    let orders = Chain::new(ok()).with(Monitor::new("orders", counters.clone()));

    users.dispatch(get("/"), &mut BufferedWriter::new()).await.unwrap();
    orders.dispatch(get("/"), &mut BufferedWriter::new()).await.unwrap();
    orders.dispatch(get("/"), &mut BufferedWriter::new()).await.unwrap();

    assert_eq!(counters.snapshot("users").unwrap().requests, 1);
    assert_eq!(counters.snapshot("orders").unwrap().requests, 2);
    assert_eq!(counters.handler_names(), ["orders", "users"]);
}

/// Remembers the names it was asked to instrument and tags responses.
#[derive(Default)]
struct Recording {
    names: Mutex<Vec<String>>,
}

impl Instrument for Recording {
    fn instrument(&self, handler_name: &str, next: BoxedHandler) -> BoxedHandler {
        self.names.lock().unwrap().push(handler_name.to_owned());
        let name = handler_name.to_owned();
        Arc::new(handler_fn(move |req, w| {
            let next = Arc::clone(&next);
            let name = name.clone();
            Box::pin(async move {
                w.headers_mut().insert("x-instrumented", name.parse().unwrap());
                next.call(req, w).await
            })
        }))
    }
}

#[tokio::test]
async fn the_instrument_receives_the_name_and_does_the_wrapping() {
    let instrument = Arc::new(Recording::default());
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.write(b"ok").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Monitor::new("checkout", Arc::clone(&instrument)));

    let mut w = BufferedWriter::new();
    chain.dispatch(get("/"), &mut w).await.unwrap();
    chain.dispatch(get("/"), &mut BufferedWriter::new()).await.unwrap();

    assert_eq!(w.sent_headers()["x-instrumented"], "checkout");
    // Composition is cached: one wrap for any number of requests.
    assert_eq!(*instrument.names.lock().unwrap(), ["checkout"]);
}
