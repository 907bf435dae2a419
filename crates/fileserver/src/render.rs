//! HTML rendering for the home page and directory listings

use maud::{html, Markup, DOCTYPE};

use crate::listing::DirectoryListing;

pub fn home_page() -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "simplefileserver" }
            }
            body {
                a href="/walk/" { "walk" }
            }
        }
    }
}

/// Render a listing as an HTML page
pub fn listing_page(listing: &DirectoryListing) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { (listing.display_path) }
            }
            body {
                h1 { "Listing for dir: " (listing.display_path) }
                ul {
                    li { a href="../" { "../" } }
                    @for entry in &listing.entries {
                        li {
                            @if entry.is_file {
                                a href={ "/" (encode_route(&entry.download_path)) } { (entry.name) }
                            } @else {
                                a href={ (urlencoding::encode(&entry.name)) "/" } { (entry.name) "/" }
                                " "
                                a href={ "/" (encode_route(&entry.download_path)) } { "zip download" }
                            }
                            " "
                            a href={ "/" (encode_route(&entry.temp_link_mint_path)) } { "temp link" }
                        }
                    }
                }
            }
        }
    }
}

/// Percent-encode every segment of a `/`-separated route
pub fn encode_route(route: &str) -> String {
    route
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
