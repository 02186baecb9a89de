use nexusflow::budget::{estimate_plan_cost, generate_suggestions};
use nexusflow::llm::PricingTable;
use nexusflow::planner::plan;
use nexusflow::schema::GraphData;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== NexusFlow Engine ===\n");

    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path).expect("Failed to read workflow file"),
        None => SAMPLE_WORKFLOW.to_string(),
    };

    let graph: GraphData = serde_json::from_str(&raw).expect("Failed to parse workflow JSON");
    println!(
        "[OK] Workflow parsed ({} nodes, {} edges)",
        graph.nodes.len(),
        graph.edges.len()
    );

    let plan = match plan(&graph) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("[ERR] Planning failed: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "[OK] Plan: {} steps, {} rounds, max parallelism {}",
        plan.total_steps, plan.estimated_rounds, plan.max_parallelism
    );
    for group in &plan.groups {
        let ids: Vec<&str> = group.entries.iter().map(|e| e.node_id.as_str()).collect();
        println!("     group {}: {}", group.group, ids.join(", "));
    }

    let pricing = PricingTable::builtin();
    let estimate = estimate_plan_cost(&plan, &pricing);
    println!(
        "\n[OK] Estimated cost: ${:.6} (confidence: {:?})",
        estimate.total, estimate.confidence
    );
    for step in &estimate.steps {
        println!(
            "     {}: {} prompt + {} completion tokens -> ${:.6}",
            step.node_id, step.prompt_tokens, step.completion_tokens, step.cost
        );
    }

    let sample_budget = 0.02;
    if estimate.total > sample_budget {
        println!("\n[!!] Over a ${sample_budget:.2} budget; suggestions:");
        let suggestions = generate_suggestions(&estimate, sample_budget, &graph, &pricing);
        for s in &suggestions {
            println!(
                "     {:?} {} saves ${:.6} (cumulative ${:.6}, fits: {})",
                s.action, s.agent, s.saves, s.cumulative_savings, s.would_fit_budget
            );
        }
    }
}

const SAMPLE_WORKFLOW: &str = r#"{
  "nodes": [
    {
      "id": "research",
      "type": "agent",
      "data": {
        "name": "Researcher",
        "provider": "openai",
        "model": "gpt-4o",
        "system_prompt": "Research the topic and list key facts.",
        "max_tokens": 1500
      }
    },
    {
      "id": "outline",
      "type": "agent",
      "data": {
        "name": "Outliner",
        "provider": "openai",
        "model": "gpt-4o-mini",
        "system_prompt": "Turn the research into an outline.",
        "max_tokens": 800
      }
    },
    {
      "id": "draft",
      "type": "agent",
      "data": {
        "name": "Writer",
        "provider": "anthropic",
        "model": "claude-3.5-sonnet",
        "system_prompt": "Write the article from the outline.",
        "max_tokens": 2000
      }
    },
    {
      "id": "review",
      "type": "agent",
      "data": {
        "name": "Reviewer",
        "provider": "openai",
        "model": "gpt-4o",
        "system_prompt": "Critique the draft.",
        "max_tokens": 600
      }
    }
  ],
  "edges": [
    { "source": "research", "target": "outline" },
    { "source": "research", "target": "draft" },
    { "source": "outline", "target": "draft" },
    { "source": "draft", "target": "review" }
  ]
}"#;
