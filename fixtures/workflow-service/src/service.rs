use tonic::{Request, Response, Status};

use crate::pb;

/// Echoes back whatever payload-bearing fields it receives, unexamined. The
/// fixture's job is to exercise the proxy's rewrite in both directions, not
/// to implement real workflow semantics -- a real upstream would decode
/// these payloads itself after the proxy's inbound transform restores them.
pub struct WorkflowServiceImpl;

#[tonic::async_trait]
impl pb::workflow_service_server::WorkflowService for WorkflowServiceImpl {
    async fn start_workflow(
        &self,
        request: Request<pb::StartWorkflowRequest>,
    ) -> Result<Response<pb::StartWorkflowResponse>, Status> {
        let req = request.into_inner();
        if req.workflow_id.is_empty() {
            return Err(Status::invalid_argument("workflow_id must not be empty"));
        }
        Ok(Response::new(pb::StartWorkflowResponse {
            run_id: format!("{}-run", req.workflow_id),
        }))
    }

    async fn update_workflow(
        &self,
        request: Request<pb::UpdateWorkflowRequest>,
    ) -> Result<Response<pb::UpdateWorkflowResponse>, Status> {
        let req = request.into_inner();
        let outcome = req.input.and_then(|input| input.args);
        Ok(Response::new(pb::UpdateWorkflowResponse { outcome }))
    }
}
