use std::sync::Arc;
use webworkers::{Handler, Opts, Request, Response, Webworkers};

struct HelloWorld;

impl Handler for HelloWorld {
    async fn handle(&self, response: &mut Response, request: &mut Request) {
        if request.path() != b"/" {
            let _ = response.status_code(404);
            let _ = response.write(b"not found").await;
            return;
        }

        let _ = response.content_type("application/json");
        let _ = response.write(br#"{"greeting":"Hello world!"}"#).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), webworkers::Error> {
    let opts = Opts {
        worker_cap: 4,
        queue_len: 256,
        address: "127.0.0.1:8080".into(),
        ..Opts::default()
    };

    let server = Arc::new(Webworkers::new(opts, HelloWorld)?);

    let listening = tokio::spawn({
        let server = server.clone();
        async move { server.listen().await }
    });

    println!("listening on 127.0.0.1:8080, press enter to stop");
    let _ = tokio::task::spawn_blocking(|| std::io::stdin().read_line(&mut String::new())).await;

    server.close()?;
    server.wait().await;

    match listening.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e).into()),
    }
}
