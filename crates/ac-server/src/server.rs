//! Evaluate server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use ac_optimizer::{Negotiator, Optimization, Session};
use ac_types::{
    AcError, AcResult, ErrorResponse, EvaluatePrepareRequest, EvaluationError, ProtocolError,
};

use crate::http::{read_request, Method, ReadError, Request, Response};

pub const PREPARE_PATH: &str = "/apis/optimizations/evaluates/prepares";
pub const RUN_PATH: &str = "/apis/optimizations/evaluates/runs";
pub const HEALTH_PATH: &str = "/health";

const MAX_DRAIN_BYTES: usize = 1024 * 1024;

/// Serves evaluate-prepare and evaluate-run for one negotiated session.
pub struct EvaluateServer {
    listener: TcpListener,
    session: Arc<Session>,
    max_body_bytes: usize,
}

impl EvaluateServer {
    pub async fn bind(session: Session, addr: &str) -> AcResult<Self> {
        let max_body_bytes = session.config().max_body_bytes;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            session: Arc::new(session),
            max_body_bytes,
        })
    }

    /// Bind to the address named by the session's configuration.
    pub async fn bind_configured(session: Session) -> AcResult<Self> {
        let addr = session.config().bind_addr();
        Self::bind(session, &addr).await
    }

    pub fn local_addr(&self) -> AcResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Accept connections until the process exits.
    pub async fn run(self) -> AcResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> AcResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "evaluate server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("evaluate server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let session = self.session.clone();
                        let limit = self.max_body_bytes;
                        tokio::spawn(async move {
                            if let Err(error) = serve_connection(socket, session, limit).await {
                                debug!(%peer, error = %error, "connection closed with error");
                            }
                        });
                    }
                    Err(error) => warn!(error = %error, "accept failed"),
                },
            }
        }
    }
}

/// Negotiate `optimization` and serve the resulting session on the
/// configured address.
pub async fn prepare_and_serve<N>(optimization: Optimization, negotiator: &N) -> AcResult<()>
where
    N: Negotiator + ?Sized,
{
    let session = optimization.prepare(negotiator).await?;
    EvaluateServer::bind_configured(session).await?.run().await
}

async fn serve_connection(
    socket: TcpStream,
    session: Arc<Session>,
    max_body_bytes: usize,
) -> std::io::Result<()> {
    let mut stream = BufReader::new(socket);
    let response = match read_request(&mut stream, max_body_bytes).await {
        Ok(request) => route(request, session).await,
        Err(ReadError::Closed) => return Ok(()),
        Err(ReadError::Io(error)) => return Err(error),
        Err(ReadError::Malformed(message)) => {
            error_response(400, &AcError::from(ProtocolError::Malformed { message }))
        }
        Err(ReadError::TooLarge { limit, declared }) => {
            // Drain the announced body before replying.
            let drain = declared.min(MAX_DRAIN_BYTES) as u64;
            tokio::io::copy(&mut (&mut stream).take(drain), &mut tokio::io::sink()).await?;
            Response::json(
                413,
                &ErrorResponse {
                    error: format!("request exceeds {limit} bytes"),
                    kind: "payload_too_large".to_string(),
                },
            )
        }
    };

    let socket = stream.get_mut();
    response.write_to(socket).await?;
    tokio::io::AsyncWriteExt::shutdown(socket).await
}

pub(crate) async fn route(request: Request, session: Arc<Session>) -> Response {
    match (request.path.as_str(), request.method) {
        (PREPARE_PATH, Method::Post) => match handle_prepare(&request, &session) {
            Ok(()) => Response::json(200, &serde_json::json!({})),
            Err(error) => failure("evaluate-prepare", &error),
        },
        (RUN_PATH, Method::Get) => match handle_run(session).await {
            Ok(response) => response,
            Err(error) => failure("evaluate-run", &error),
        },
        (HEALTH_PATH, Method::Get) => Response::json(
            200,
            &serde_json::json!({"status": "ok", "service": "autocode-client"}),
        ),
        (PREPARE_PATH | RUN_PATH | HEALTH_PATH, _) => Response::json(
            405,
            &ErrorResponse {
                error: format!("method not allowed on {}", request.path),
                kind: "method_not_allowed".to_string(),
            },
        ),
        _ => Response::json(
            404,
            &ErrorResponse {
                error: format!("no route for {}", request.path),
                kind: "not_found".to_string(),
            },
        ),
    }
}

fn handle_prepare(request: &Request, session: &Session) -> AcResult<()> {
    let body: EvaluatePrepareRequest =
        serde_json::from_slice(&request.body).map_err(|e| ProtocolError::Malformed {
            message: format!("evaluate-prepare body: {e}"),
        })?;
    session.prepare_evaluation(&body)?;
    Ok(())
}

async fn handle_run(session: Arc<Session>) -> AcResult<Response> {
    let result = tokio::task::spawn_blocking(move || session.run_evaluation())
        .await
        .map_err(|e| {
            AcError::from(EvaluationError::Failed {
                message: format!("objective panicked: {e}"),
            })
        })??;
    Ok(Response::json(200, &result))
}

fn failure(endpoint: &str, error: &AcError) -> Response {
    let status = status_for(error);
    warn!(endpoint, status, kind = error.kind(), error = %error, "request failed");
    error_response(status, error)
}

fn error_response(status: u16, error: &AcError) -> Response {
    Response::json(status, &ErrorResponse::from(error))
}

pub(crate) fn status_for(error: &AcError) -> u16 {
    match error {
        AcError::Protocol(_) | AcError::Validation(_) | AcError::Serialization(_) => 400,
        AcError::Evaluation(EvaluationError::InFlight { .. } | EvaluationError::NotPrepared) => 409,
        _ => 500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::{HydrationError, ResolutionError};

    #[test]
    fn status_mapping() {
        let protocol = AcError::from(ProtocolError::Malformed {
            message: "x".into(),
        });
        assert_eq!(status_for(&protocol), 400);
        assert_eq!(status_for(&EvaluationError::NotPrepared.into()), 409);
        assert_eq!(
            status_for(
                &EvaluationError::InFlight {
                    evaluation_id: "e".into()
                }
                .into()
            ),
            409
        );
        assert_eq!(
            status_for(
                &ResolutionError::ValueNotFound {
                    variable_id: "v".into()
                }
                .into()
            ),
            500
        );
        assert_eq!(
            status_for(&HydrationError::StrategyNotFound { name: "s".into() }.into()),
            500
        );
    }
}
