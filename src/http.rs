//! HTTP surface
//!
//! One listener per node serving three things:
//!
//! - the S3-subset object API at `/{bucket}` and `/{bucket}/{object}`
//! - the peer RPC services at `/_` (disk) and `/_/lock` (namespace lock)
//! - operational endpoints at `/_/health` and `/_/metrics`
//!
//! Handlers are methods on a server struct holding the cluster context; each
//! request mints its own request id and gets single-shot dispatcher/locker
//! clones.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, BodyStream, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpListener;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::backend::{Backend, Disk, QuorumBackend, ShardStream};
use crate::config::Setup;
use crate::error::{Error, Result};
use crate::handler::StoreHandler;
use crate::metrics::Metrics;
use crate::nslock::{ClusterLocker, Locker, NsLocker};
use crate::rpc::server::RpcReply;
use crate::rpc::{
    DiskRpcServer, LockRpcServer, RemoteDisk, RemoteLocker, DEFAULT_RPC_TIMEOUT,
};

type ApiBody = UnsyncBoxBody<Bytes, std::io::Error>;

// =============================================================================
// Cluster
// =============================================================================

/// Everything one node knows about its peers.
pub struct Cluster {
    pub setup: Setup,
    pub peers: Vec<Arc<dyn Backend>>,
    pub lockers: Vec<Arc<dyn Locker>>,
    pub local_disk: Arc<Disk>,
    pub local_locker: Arc<NsLocker>,
    pub metrics: Metrics,
}

impl Cluster {
    /// Build the peer set: the local export plus one RPC client pair per
    /// remote endpoint.
    pub async fn build(setup: Setup) -> Result<Arc<Self>> {
        let local_disk = Disk::create(&setup.export_dir).await?;
        let local_locker = NsLocker::new();

        let mut peers: Vec<Arc<dyn Backend>> = Vec::with_capacity(setup.endpoints.len());
        let mut lockers: Vec<Arc<dyn Locker>> = Vec::with_capacity(setup.endpoints.len());

        for (i, endpoint) in setup.endpoints.iter().enumerate() {
            if i == setup.local_index {
                peers.push(local_disk.clone());
                lockers.push(local_locker.clone());
            } else {
                peers.push(Arc::new(RemoteDisk::new(endpoint.disk_service_url())?));
                lockers.push(Arc::new(RemoteLocker::new(endpoint.lock_service_url())?));
            }
        }

        Ok(Arc::new(Self {
            setup,
            peers,
            lockers,
            local_disk,
            local_locker,
            metrics: Metrics::new()?,
        }))
    }

    /// A fresh single-shot dispatcher for one request.
    pub fn dispatcher(&self) -> QuorumBackend {
        QuorumBackend::new(
            self.peers.clone(),
            self.setup.local_index,
            self.setup.data_count,
            self.setup.parity_count,
            self.setup.shard_size,
            self.setup.read_quorum,
            self.setup.write_quorum,
        )
    }

    /// A fresh single-shot cluster locker for one request.
    pub fn cluster_locker(&self) -> ClusterLocker {
        ClusterLocker::new(
            self.lockers.clone(),
            self.setup.read_quorum,
            self.setup.write_quorum,
        )
    }

    pub fn handler(&self) -> StoreHandler {
        StoreHandler::new(self.dispatcher(), self.cluster_locker())
    }
}

// =============================================================================
// Body Helpers
// =============================================================================

fn full_body(data: impl Into<Bytes>) -> ApiBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

fn stream_body(reader: ShardStream) -> ApiBody {
    BodyExt::boxed_unsync(StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)))
}

fn rpc_reply_body(reply: RpcReply) -> ApiBody {
    let RpcReply { frame, body } = reply;
    match body {
        Some(stream) => {
            let head = futures::stream::once(async move {
                Ok::<_, std::io::Error>(Frame::data(Bytes::from(frame)))
            });
            let tail = ReaderStream::new(stream).map_ok(Frame::data);
            BodyExt::boxed_unsync(StreamBody::new(head.chain(tail)))
        }
        None => full_body(frame),
    }
}

/// Present an incoming HTTP body as a byte stream.
fn body_reader(body: Incoming) -> ShardStream {
    let stream = BodyStream::new(body).map(|result| match result {
        Ok(frame) => Ok(frame.into_data().unwrap_or_default()),
        Err(err) => Err(std::io::Error::new(std::io::ErrorKind::Other, err)),
    });
    let boxed: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> = Box::pin(stream);
    Box::new(StreamReader::new(boxed))
}

fn response(status: StatusCode, body: ApiBody) -> Response<ApiBody> {
    Response::builder()
        .status(status)
        .body(body)
        .unwrap_or_else(|_| Response::new(full_body(Bytes::new())))
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::BucketNotFound | Error::ObjectNotFound | Error::DataNotFound => {
            StatusCode::NOT_FOUND
        }
        Error::BucketAlreadyExists => StatusCode::CONFLICT,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> Response<ApiBody> {
    response(status_for(err), full_body(format!("{}\n", err)))
}

fn query_params(query: Option<&str>) -> Vec<(String, String)> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn query_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

// =============================================================================
// Server
// =============================================================================

/// The node's HTTP front end.
pub struct Server {
    cluster: Arc<Cluster>,
    disk_rpc: DiskRpcServer,
    lock_rpc: LockRpcServer,
}

impl Server {
    pub fn new(cluster: Arc<Cluster>) -> Arc<Self> {
        let disk_rpc = DiskRpcServer::new(cluster.local_disk.clone());
        let lock_rpc = LockRpcServer::new(cluster.local_locker.clone());
        Arc::new(Self {
            cluster,
            disk_rpc,
            lock_rpc,
        })
    }

    /// Accept loop; one connection per task.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);

        let keepalive = TcpKeepalive::new().with_time(DEFAULT_RPC_TIMEOUT);

        loop {
            let (stream, _) = listener.accept().await?;
            if let Err(err) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                debug!("tcp keep-alive setup failed: {}", err);
            }
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.route(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("connection error: {}", err);
                }
            });
        }
    }

    async fn route(&self, req: Request<Incoming>) -> Response<ApiBody> {
        let path = req.uri().path().trim_start_matches('/').to_string();

        if path.is_empty() {
            return response(StatusCode::OK, full_body("stripestor\n"));
        }

        if path == "_" || path.starts_with("_/") {
            return self.route_internal(&path, req).await;
        }

        let (bucket, object) = match path.split_once('/') {
            Some((bucket, object)) if !object.is_empty() => {
                (bucket.to_string(), Some(object.to_string()))
            }
            _ => (path.trim_end_matches('/').to_string(), None),
        };
        if bucket.is_empty() {
            return response(StatusCode::NOT_FOUND, full_body("not found\n"));
        }

        match object {
            Some(object) => self.route_object(req, &bucket, &object).await,
            None => self.route_bucket(req, &bucket).await,
        }
    }

    async fn route_internal(&self, path: &str, req: Request<Incoming>) -> Response<ApiBody> {
        match (req.method().clone(), path) {
            (Method::POST, "_") => {
                let reply = self.disk_rpc.serve(body_reader(req.into_body())).await;
                response(StatusCode::OK, rpc_reply_body(reply))
            }
            (Method::POST, "_/lock") => {
                let reply = self.lock_rpc.serve(body_reader(req.into_body())).await;
                response(StatusCode::OK, rpc_reply_body(reply))
            }
            (Method::GET, "_/metrics") => {
                response(StatusCode::OK, full_body(self.cluster.metrics.export()))
            }
            (Method::GET, "_/health") => response(StatusCode::OK, full_body("ok\n")),
            _ => response(StatusCode::NOT_FOUND, full_body("not found\n")),
        }
    }

    // =========================================================================
    // Bucket Routes
    // =========================================================================

    async fn route_bucket(&self, req: Request<Incoming>, bucket: &str) -> Response<ApiBody> {
        let request_id = Uuid::new_v4().to_string();
        let params = query_params(req.uri().query());
        let method = req.method().clone();
        let mut handler = self.cluster.handler();

        let (operation, resp) = match method {
            Method::PUT => {
                let result = handler.put_bucket(&request_id, bucket).await;
                ("put_bucket", self.empty_result(result))
            }
            Method::DELETE => {
                let result = handler.delete_bucket(&request_id, bucket).await;
                ("delete_bucket", self.empty_result(result))
            }
            Method::HEAD => {
                let result = handler.head_bucket(&request_id, bucket).await;
                ("head_bucket", self.empty_result(result.map(|_| ())))
            }
            Method::GET => {
                let prefix = query_value(&params, "prefix").unwrap_or("");
                let start_after = query_value(&params, "start-after").unwrap_or("");
                let max_keys = query_value(&params, "max-keys")
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(1000usize);

                let resp = match handler.get_bucket(bucket, prefix, start_after, max_keys).await {
                    Ok(listing) => match serde_json::to_vec(&listing) {
                        Ok(body) => Response::builder()
                            .status(StatusCode::OK)
                            .header("Content-Type", "application/json")
                            .body(full_body(body))
                            .unwrap_or_else(|_| response(StatusCode::OK, full_body(Bytes::new()))),
                        Err(err) => error_response(&err.into()),
                    },
                    Err(err) => error_response(&err),
                };
                ("get_bucket", resp)
            }
            _ => (
                "bucket",
                response(StatusCode::METHOD_NOT_ALLOWED, full_body("method not allowed\n")),
            ),
        };

        self.cluster
            .metrics
            .record_request(operation, resp.status().as_u16());
        resp
    }

    // =========================================================================
    // Object Routes
    // =========================================================================

    async fn route_object(
        &self,
        req: Request<Incoming>,
        bucket: &str,
        object: &str,
    ) -> Response<ApiBody> {
        let request_id = Uuid::new_v4().to_string();
        let params = query_params(req.uri().query());
        let version_id = query_value(&params, "versionId").unwrap_or("").to_string();
        let method = req.method().clone();
        let mut handler = self.cluster.handler();

        let (operation, resp) = match method {
            Method::PUT => {
                let resp = match content_length(&req) {
                    Ok(size) => {
                        let body = body_reader(req.into_body());
                        let result = handler
                            .put_object(&request_id, bucket, object, &version_id, body, size)
                            .await;
                        if result.is_ok() {
                            self.cluster.metrics.record_bytes_received(size);
                        }
                        self.empty_result(result)
                    }
                    Err(err) => error_response(&err),
                };
                ("put_object", resp)
            }
            Method::GET => {
                let offset = query_value(&params, "offset")
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(0u64);
                let length = query_value(&params, "length").and_then(|raw| raw.parse().ok());

                let resp = match handler
                    .get_object(&request_id, bucket, object, &version_id, offset, length)
                    .await
                {
                    Ok((reader, content_length)) => {
                        self.cluster.metrics.record_bytes_sent(content_length);
                        Response::builder()
                            .status(StatusCode::OK)
                            .header("Content-Length", content_length)
                            .body(stream_body(reader))
                            .unwrap_or_else(|_| response(StatusCode::OK, full_body(Bytes::new())))
                    }
                    Err(err) => error_response(&err),
                };
                ("get_object", resp)
            }
            Method::HEAD => {
                let resp = match handler
                    .head_object(&request_id, bucket, object, &version_id)
                    .await
                {
                    Ok(info) => Response::builder()
                        .status(StatusCode::OK)
                        .header("Content-Length", 0)
                        .header("x-object-size", info.object_size)
                        .body(full_body(Bytes::new()))
                        .unwrap_or_else(|_| response(StatusCode::OK, full_body(Bytes::new()))),
                    Err(err) => error_response(&err),
                };
                ("head_object", resp)
            }
            Method::DELETE => {
                let result = handler
                    .delete_object(&request_id, bucket, object, &version_id)
                    .await;
                ("delete_object", self.empty_result(result))
            }
            _ => (
                "object",
                response(StatusCode::METHOD_NOT_ALLOWED, full_body("method not allowed\n")),
            ),
        };

        self.cluster
            .metrics
            .record_request(operation, resp.status().as_u16());
        resp
    }

    fn empty_result(&self, result: Result<()>) -> Response<ApiBody> {
        match result {
            Ok(()) => response(StatusCode::OK, full_body(Bytes::new())),
            Err(err) => {
                if !err.is_semantic() {
                    error!("request failed: {}", err);
                }
                error_response(&err)
            }
        }
    }
}

fn content_length(req: &Request<Incoming>) -> Result<u64> {
    let raw = req
        .headers()
        .get("content-length")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::InvalidArgument("missing content-length".to_string()))?;

    let size: u64 = raw
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid content-length {}", raw)))?;
    if size > i64::MAX as u64 {
        return Err(Error::InvalidArgument(format!(
            "content-length overflow {}",
            size
        )));
    }
    Ok(size)
}

// =============================================================================
// Tests
// =============================================================================
