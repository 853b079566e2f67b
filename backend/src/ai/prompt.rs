//! Prompt generation for delegated rule parsing
//!
//! Builds prompts asking the model to turn one natural-language instruction
//! into a single rule object.

use serde_json::Value;

use crate::rules::RuleRequest;
use crate::validation::RULE_SCHEMA;

/// Generate the system prompt for rule parsing
pub fn system_prompt() -> String {
    format!(
        r#"You convert instructions about bank statement spreadsheets into transformation rules. The instructions are often written in Chinese.

## Your Mission

Given:
1. One instruction, written by an accountant
2. The bank the instruction applies to
3. The list of standard output fields

Return exactly one JSON rule object.

## CRITICAL: Output Format

You MUST return ONLY valid JSON matching this schema EXACTLY:

```json
{rule_schema}
```

## Rule Types

- `field_copy`: copy a source column (or a standard field) into a standard field.
  Parameters: `source_field`, `target_field`.
- `date_range_merge`: the sheet only has month/day parts; take the year from the date range line
  (e.g. "起止日期: 2021年12月01日-2022年01月31日") found in raw row `range_source_row` (zero-based).
  Parameters: `date_part_fields` (columns holding the date parts, in order), `range_source_row`, `target_field`.
- `balance_adjust`: add `delta` to a running balance, row by row. Parameters: `target_field`, `delta`,
  optional `apply_condition` with `kind` one of `always`, `field_non_empty`, `field_equals`,
  `amount_positive`, `amount_negative`.
- `income_expense_classify`: write `positive_label` for positive amounts and `negative_label` for negative ones.
  Parameters: `amount_field`, `target_field`, `positive_label`, `negative_label`.
- `page_break`: start a new row group every `every_n_rows` rows. Parameter: `every_n_rows`.
- `custom`: anything else. Parameter: `raw_description` (the instruction, verbatim), optional `structured_params`.
  Executable `structured_params` (tag `op`): `debit_credit` (`flag_column`, `amount_column`, optional `mapping`
  such as {{"贷": "+", "借": "-"}}, `target_field`, `type_field`) signs an amount by a debit/credit flag;
  `split_columns` (`debit_column`, `credit_column`, `target_field`, `type_field`) folds separate debit and credit
  columns into one signed amount.

## Rules

1. `target_field` MUST be one of the standard fields listed by the user
2. Use exact source column names as written in the instruction (case-sensitive)
3. Include every required parameter of the chosen type and NO other keys
4. Do NOT add `id`, `bank_scope` or `created_from`
5. When unsure, use `custom` with the instruction as `raw_description`
6. Return ONLY the JSON object, no explanations or markdown"#,
        rule_schema = RULE_SCHEMA
    )
}

/// Generate the user prompt for one instruction
pub fn user_prompt(request: &RuleRequest) -> String {
    let fields = request
        .available_standard_fields
        .iter()
        .map(|f| format!("- `{}`", f))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"## Bank

{bank}

## Standard Fields

{fields}

## Instruction

{instruction}

Return ONLY the JSON rule object. No explanations."#,
        bank = request.bank_scope,
        fields = fields,
        instruction = request.instruction_text
    )
}

/// Build the message list for the request
pub fn build_messages(request: &RuleRequest) -> Vec<Value> {
    vec![serde_json::json!({
        "role": "user",
        "content": user_prompt(request)
    })]
}
