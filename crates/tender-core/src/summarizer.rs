//! Map-reduce summarization of tender payloads through an [`LlmProvider`].

use std::future::Future;

use tender_llm::{LlmError, LlmProvider, Message};

use crate::assembler::Payload;
use crate::config::SummaryConfig;

const SYSTEM_PROMPT: &str = "Ты помощник по анализу тендерной документации.";
const EMPTY_INPUT_TEXT: &str = "Не удалось извлечь текст из файла.";
const EMPTY_RESPONSE_TEXT: &str = "Не удалось сформировать саммари.";

const CHUNK_INSTRUCTION: &str = "Верни только факты. Если данных нет, так и напиши.

КРИТИЧЕСКИ ВАЖНО: максимально полно извлекай требования к исполнителю работ.
Особенно отметь:
- требования к регистрации (в субъекте РФ/регионе, ЕГРЮЛ/ЕГРИП)
- статус ИП/ООО/иные организационные требования
- СРО (членство, допуски, уровни ответственности, регион регистрации)
- лицензии/разрешения/аккредитации
- договоры с полигонами/объектами утилизации/переработки
- требования к технике, персоналу, опыту и аналогичным контрактам
- обязательные подтверждающие документы по этим пунктам

Нужно кратко извлечь:
1) Предмет закупки
2) Что должен предоставить исполнитель
3) Требования к участнику (подробно, как ключевой блок)
4) Сроки/этапы
5) Финансовые условия (НМЦК, обеспечение, штрафы)
6) Территориальность: где фактически выполняются работы/услуги, точки погрузки/разгрузки, полигоны/объекты исполнения (не путать с адресом заказчика)
7) Тип процедуры: котировка/аукцион/конкурс/иной вид закупки
8) Unit-экономика: ставки за тонну и/или за м3, а также расчет цены 1 машины 30 м3 (если есть цена за м3: цена_машины = цена_за_м3 * 30; если есть только цена за тонну - если есть цена за кг: цена_тонны = цена_кг * 1000)
9) Контактные данные заказчика или представителя заказчика для связи: ФИО, должность, телефон, email, отдел/подразделение, график связи (если есть), а также откуда в документе взяты контакты
10) Ключевые риски/неясности";

const FINAL_INSTRUCTION: &str = "Стиль: деловой, коротко, без воды.
Выведи строго в формате с отдельными заголовками строками:
Кратко о закупке:
Тип закупки/процедуры:
Территориальность:
Unit-экономика:
Требования к исполнителю работ:
Контактные данные заказчика/представителя:
Основные требования:
Документы/условия участия:
Ключевые сроки:
Деньги/гарантии:
Риски и что уточнить:
В блоке 'Требования к исполнителю работ' отдельно перечисли:
- регистрация (в т.ч. региональные ограничения)
- ИП/ООО/правовая форма
- СРО/допуски
- лицензии
- договоры с полигонами/утилизацией
- опыт, техника, персонал
- какие документы подтверждают каждый пункт
Для блока Unit-экономика отдельно укажи:
- цену за тонну
- цену за м3
- цену машины 30 м3 (если возможно рассчитать)
Для блока 'Контактные данные заказчика/представителя' укажи:
- ФИО
- должность/роль
- телефон
- email
- источник в документе (раздел/пункт)
Если контактов нет, так и напиши: 'Контакты в документах не найдены'.
Если данных нет, явно укажи это. Ничего не придумывай.";

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarization request failed: {0}")]
    Llm(#[from] LlmError),
}

/// Produces a summary for an assembled payload.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        payload: &Payload,
    ) -> impl Future<Output = Result<String, SummarizeError>> + Send;
}

/// Strip every line and drop the blank ones.
#[must_use]
pub fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep at most `max_chars` characters.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Split into windows of `chunk_size` characters where consecutive windows
/// share `overlap` characters. The overlap is capped at half a window.
#[must_use]
pub fn split_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_owned()];
    }

    let overlap = overlap.min(chunk_size / 2);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    chunks
}

fn chunk_prompt(index: usize, total: usize) -> String {
    format!("Ты анализируешь часть тендерной документации ({index}/{total}). {CHUNK_INSTRUCTION}")
}

fn final_prompt(language: &str) -> String {
    format!("Сформируй итоговое саммари на языке: {language}.\n{FINAL_INSTRUCTION}")
}

/// [`Summarizer`] backed by a chat-completion provider.
///
/// Long inputs are summarized chunk by chunk, then the partial summaries are
/// condensed into the final structured summary.
#[derive(Debug)]
pub struct LlmSummarizer<P> {
    provider: P,
    settings: SummaryConfig,
}

impl<P: LlmProvider> LlmSummarizer<P> {
    #[must_use]
    pub fn new(provider: P, settings: SummaryConfig) -> Self {
        Self { provider, settings }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn ask(&self, instruction: &str, content: &str) -> Result<String, LlmError> {
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("{instruction}\n\nТекст:\n{content}")),
        ];
        match self.provider.chat(&messages).await {
            Ok(text) => Ok(text.trim().to_owned()),
            Err(LlmError::EmptyResponse { provider }) => {
                tracing::warn!(provider, "model returned no content");
                Ok(EMPTY_RESPONSE_TEXT.to_owned())
            }
            Err(e) => Err(e),
        }
    }

    /// Summarize `text` under `title`.
    ///
    /// # Errors
    ///
    /// Propagates provider failures. Blank input is not an error: it yields
    /// a fixed notice without calling the model.
    pub async fn summarize_text(&self, title: &str, text: &str) -> Result<String, SummarizeError> {
        let normalized = normalize_lines(text);
        if normalized.is_empty() {
            return Ok(EMPTY_INPUT_TEXT.to_owned());
        }

        let truncated = truncate_chars(&normalized, self.settings.max_doc_chars);
        if truncated.len() < normalized.len() {
            tracing::debug!(
                title,
                max_doc_chars = self.settings.max_doc_chars,
                "input truncated before summarization"
            );
        }

        let chunks = split_chunks(
            truncated,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        );
        let final_instruction = final_prompt(&self.settings.language);

        let summary = if let [only] = chunks.as_slice() {
            self.ask(&final_instruction, only).await?
        } else {
            let total = chunks.len();
            tracing::info!(title, chunks = total, "summarizing in chunks");
            let mut partials = Vec::with_capacity(total);
            for (i, chunk) in chunks.iter().enumerate() {
                partials.push(self.ask(&chunk_prompt(i + 1, total), chunk).await?);
            }
            self.ask(&final_instruction, &partials.join("\n\n")).await?
        };

        Ok(format!("Файл: {title}\n\n{summary}").trim().to_owned())
    }
}

impl<P: LlmProvider> Summarizer for LlmSummarizer<P> {
    async fn summarize(&self, payload: &Payload) -> Result<String, SummarizeError> {
        self.summarize_text(&payload.title, &payload.render()).await
    }
}
