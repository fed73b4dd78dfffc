mod service;

use clap::Parser;
use tonic::transport::Server;

pub mod pb {
    tonic::include_proto!("workflow.v1");

    pub(crate) const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("workflow_descriptor");

    pub mod payload {
        tonic::include_proto!("payloadproxy.v1");
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "workflow-service-fixture",
    about = "Toy upstream workflow gRPC service for payload-proxy integration tests"
)]
struct Cli {
    /// Port to listen on (0 for ephemeral)
    #[arg(short = 'p', long = "port", default_value_t = 0)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let addr: std::net::SocketAddr = format!("127.0.0.1:{}", cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    println!("workflow-service-fixture listening on {local_addr}");

    let workflow_service = pb::workflow_service_server::WorkflowServiceServer::new(service::WorkflowServiceImpl);

    Server::builder()
        .add_service(workflow_service)
        .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
        .await?;

    Ok(())
}
