use utoipa::openapi::{InfoBuilder, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub fn create_swagger_ui(mut openapi: OpenApi) -> SwaggerUi {
    openapi.info = InfoBuilder::new()
        .title("FoodHub OrderService API")
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi)
}
