use axum::{
    body::Body,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

// Map tiles, the map library, fonts and hosted campground images come from
// these origins.
const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
     script-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net https://api.mapbox.com https://cdnjs.cloudflare.com; \
     style-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net https://api.mapbox.com https://fonts.googleapis.com https://cdnjs.cloudflare.com; \
     connect-src 'self' https://api.mapbox.com https://events.mapbox.com https://cdn.jsdelivr.net https://*.tiles.mapbox.com https://*.mapbox.com; \
     img-src 'self' data: blob: https://images.unsplash.com https://res.cloudinary.com https://api.mapbox.com https://*.mapbox.com; \
     font-src 'self' https://fonts.gstatic.com https://cdn.jsdelivr.net; \
     worker-src 'self' blob:; \
     child-src blob:; \
     frame-src 'self'";

pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=15552000; includeSubDomains"),
    );

    response
}
