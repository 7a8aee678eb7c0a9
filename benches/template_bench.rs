//! Quick benchmark to verify template rendering performance

use aigne_runtime::template::{self, RenderContext, Resolution, Template};
use aigne_runtime::AigneError;
use futures::FutureExt;
use serde_json::{json, Value};
use std::time::Instant;

fn data() -> Value {
    json!({
        "question": "How long do refunds take?",
        "category": "billing",
        "user": { "name": "Ada", "plan": "pro" },
        "docs": [
            { "title": "Refunds", "body": "Refunds take five days." },
            { "title": "Invoices", "body": "Invoices are sent monthly." }
        ]
    })
}

fn main() {
    let templates = vec![
        "Simple text with no templates",
        "Question: {{question}}",
        "[{{category}}] {{user.name}} ({{user.plan}}) asks {{question}}",
        "{{#docs}}## {{title}}\n{{body}}\n{{/docs}}{{^missing}}none missing{{/missing}}",
    ];
    let data = data();

    println!("Template Rendering Performance Test");
    println!("===================================\n");

    for source in &templates {
        let iterations = 100_000;

        let start = Instant::now();
        for _ in 0..iterations {
            let _ = Template::parse(source);
        }
        let parse_elapsed = start.elapsed();

        let parsed = Template::parse(source).expect("bench template parses");
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = parsed.render_plain(&data);
        }
        let render_elapsed = start.elapsed();

        println!("Template: {:60}", format!("{:?}", source));
        println!("  Parse per operation:  {:?}", parse_elapsed / iterations);
        println!("  Render per operation: {:?}\n", render_elapsed / iterations);
    }

    println!("Resolver Rendering");
    println!("==================\n");

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let source = "{{#memory}}tone{{/memory}} {{#memory}}language{{/memory}} {{question}}";
    let iterations = 10_000;

    let start = Instant::now();
    runtime.block_on(async {
        for _ in 0..iterations {
            let ctx = RenderContext::new(data.clone()).with_resolver("memory", |key: &str| {
                let value = json!(format!("<{}>", key));
                Resolution::Pending(async move { Ok::<_, AigneError>(Some(value)) }.boxed())
            });
            let _ = template::render(source, ctx).await;
        }
    });
    let elapsed = start.elapsed();

    println!("Template: {:?}", source);
    println!("  Time for {} iterations: {:?}", iterations, elapsed);
    println!("  Per operation: {:?}", elapsed / iterations);
}
