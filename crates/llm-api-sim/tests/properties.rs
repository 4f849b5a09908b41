// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Property tests for chunking, framing and chain parsing

mod common;

use common::*;
use llm_api_sim::config::{EmitterConfig, SimConfig, UsageConfig};
use llm_api_sim::dispatch::select_plan;
use llm_api_sim::emitter::{ResponseMeta, SseFrame, anthropic, openai};
use llm_api_sim::generator::{chunk_chars, chunk_words, filler_text};
use llm_api_sim::instruction::{Plan, Step, ToolCall, parse_chain};
use proptest::prelude::*;
use serde_json::{Value, json};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn emitter_config(words_per_chunk: usize) -> EmitterConfig {
    EmitterConfig {
        words_per_chunk,
        ..EmitterConfig::default()
    }
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0usize..30).prop_map(|length| Step::Text { length }),
        ("[a-z_]{1,12}", "[ -~]{0,60}").prop_map(|(name, payload)| Step::ToolCalls(vec![ToolCall {
            id: format!("call_{}", name),
            arguments: json!({"payload": payload}).to_string(),
            name,
        }])),
        "[a-zA-Z ]{0,40}".prop_map(|text| Step::ExplicitText(
            llm_api_sim::instruction::TextValue::Literal(text)
        )),
    ]
}

proptest! {
    #[test]
    fn chunk_words_reconstructs_any_text(text in "[a-z \n\t]{0,80}", n in 1usize..6) {
        let fragments = chunk_words(&text, n);
        prop_assert_eq!(fragments.concat(), text.clone());
        for fragment in &fragments {
            prop_assert!(fragment.split_whitespace().count() <= n);
        }
    }

    #[test]
    fn chunk_chars_reconstructs_any_text(text in "\\PC{0,60}", n in 1usize..16) {
        let slices = chunk_chars(&text, n);
        prop_assert_eq!(slices.concat(), text.clone());
        prop_assert!(slices.iter().all(|slice| slice.chars().count() <= n));
    }

    #[test]
    fn text_step_reconstructs_word_count(length in 0usize..120, n in 1usize..8) {
        let plan = Plan::new("p").with_step(Step::Text { length });
        let meta = ResponseMeta::new("x", "m", UsageConfig::default());

        let mut frames: Vec<SseFrame> = Vec::new();
        block_on(openai::stream(&plan, &meta, &emitter_config(n), &mut frames)).unwrap();
        prop_assert_eq!(openai_content(&frames), filler_text(length));

        let mut events: Vec<SseFrame> = Vec::new();
        block_on(anthropic::stream(&plan, &meta, &emitter_config(n), &mut events)).unwrap();
        prop_assert_eq!(word_count(&anthropic_text(&events)), length);

        let document = openai::document(&plan, &meta);
        prop_assert_eq!(
            word_count(document["choices"][0]["message"]["content"].as_str().unwrap_or("")),
            length
        );

        let message = anthropic::document(&plan, &meta);
        let text: String = message["content"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|block| block["type"] == "text")
            .map(|block| block["text"].as_str().unwrap())
            .collect();
        prop_assert_eq!(word_count(&text), length);
        prop_assert_eq!(text, filler_text(length));
    }

    #[test]
    fn tool_arguments_reconstruct(payload in "[ -~]{0,200}", n in 1usize..6) {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "tool".to_string(),
            arguments: json!({"payload": payload}).to_string(),
        };
        let plan = Plan::new("p").with_step(Step::ToolCalls(vec![call.clone()]));
        let meta = ResponseMeta::new("x", "m", UsageConfig::default());
        let mut frames: Vec<SseFrame> = Vec::new();
        block_on(openai::stream(&plan, &meta, &emitter_config(n), &mut frames)).unwrap();

        let deltas: Vec<Value> = frames
            .iter()
            .filter(|frame| !frame.is_done())
            .filter_map(|frame| {
                let chunk = frame.json().unwrap();
                chunk["choices"][0]["delta"]["tool_calls"][0]
                    .as_object()
                    .cloned()
                    .map(Value::Object)
            })
            .collect();
        let names = deltas.iter().filter(|delta| delta["function"].get("name").is_some()).count();
        prop_assert_eq!(names, 1);
        let arguments: String = deltas
            .iter()
            .map(|delta| delta["function"]["arguments"].as_str().unwrap_or(""))
            .collect();
        prop_assert_eq!(arguments, call.arguments);
    }

    #[test]
    fn anthropic_blocks_are_contiguous(
        steps in prop::collection::vec(step_strategy(), 0..8),
        reasoning in prop::option::of(0usize..10),
    ) {
        let mut plan = Plan::new("p");
        plan.steps = steps;
        plan.reasoning_length = reasoning;
        let meta = ResponseMeta::new("msg_", "m", UsageConfig::default());
        let mut frames: Vec<SseFrame> = Vec::new();
        block_on(anthropic::stream(&plan, &meta, &EmitterConfig::default(), &mut frames)).unwrap();

        let mut expected = 0u64;
        let mut open = false;
        for frame in &frames {
            let event = frame.json().unwrap();
            match event["type"].as_str().unwrap() {
                "content_block_start" => {
                    prop_assert!(!open);
                    prop_assert_eq!(event["index"].as_u64(), Some(expected));
                    open = true;
                }
                "content_block_stop" => {
                    prop_assert!(open);
                    prop_assert_eq!(event["index"].as_u64(), Some(expected));
                    open = false;
                    expected += 1;
                }
                _ => {}
            }
        }
        prop_assert!(!open);
        prop_assert_eq!(frames.last().unwrap().event.as_deref(), Some("message_stop"));
    }

    #[test]
    fn bare_instruction_matches_single_element_chain(
        lengths in prop::collection::vec(0usize..50, 1..5),
        label in "[a-z]{1,8}",
    ) {
        let messages: Vec<Value> = lengths
            .iter()
            .map(|length| json!({"text_message": {"length": length}}))
            .collect();
        let instruction = json!({"id": label, "messages": messages});
        let bare = parse_chain(&scripted(&instruction.to_string()));
        let wrapped =
            parse_chain(&scripted(&json!({"instruction_chain": [instruction]}).to_string()));
        prop_assert_eq!(bare, wrapped);
    }

    #[test]
    fn cursor_never_repeats_a_position(chain_len in 1usize..6, turns in 0usize..10) {
        let plans: Vec<Value> = (0..chain_len)
            .map(|i| {
                json!({
                    "id": format!("step-{}", i),
                    "messages": [{"text_message": {"length": i + 1}}]
                })
            })
            .collect();
        let script = scripted(&json!({"instruction_chain": plans}).to_string());
        let mut messages = vec![json!({"role": "user", "content": script})];
        let config = SimConfig::default();

        let mut previous: Option<String> = None;
        for turn in 0..=turns {
            let selection = select_plan(&messages, &config);
            prop_assert_eq!(selection.cursor, Some(turn));
            if turn < chain_len {
                prop_assert_eq!(selection.plan.label.clone(), format!("step-{}", turn));
                prop_assert_ne!(Some(selection.plan.label.clone()), previous.clone());
            } else {
                prop_assert_eq!(selection.plan.label.as_str(), "completion");
            }
            previous = Some(selection.plan.label);
            messages.push(json!({"role": "assistant", "content": "ok"}));
        }
    }
}
