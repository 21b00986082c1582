use utoipa::OpenApi;

use crate::routes::health::HealthApi;
use crate::routes::import_tasks::ImportTasksApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "studio-server",
    description = "Import-task log retrieval and download API",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(HealthApi::openapi());
    root.merge(ImportTasksApi::openapi());
    root
}
